//! Unsigned native-SOL transfer transactions.
//!
//! Builds Solana legacy transactions in their wire format: a compact-u16
//! prefixed list of signature slots followed by the message (header, account
//! keys, recent blockhash, compiled instructions). Signature slots are left
//! zeroed; the external wallet fills them in when it signs.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use mastermind_shared::amount::{sol_to_lamports, split_join_amount};
use mastermind_shared::constants::SIGNATURE_SIZE;
use mastermind_shared::WalletAddress;

use crate::error::{PaymentError, Result};

/// System program instruction index for `Transfer`.
const SYSTEM_TRANSFER_TAG: u32 = 2;

// ---------------------------------------------------------------------------
// Blockhash
// ---------------------------------------------------------------------------

/// A recent blockhash (32 bytes, base58 on the wire).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blockhash([u8; 32]);

impl Blockhash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for Blockhash {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| PaymentError::Rpc(format!("invalid blockhash {s:?}: {e}")))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PaymentError::Rpc(format!("blockhash {s:?} is not 32 bytes")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({self})")
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: WalletAddress,
    pub is_signer: bool,
    pub is_writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: WalletAddress,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// `11111111111111111111111111111111`: the all-zero key.
pub fn system_program_id() -> WalletAddress {
    WalletAddress::from_bytes([0u8; 32])
}

/// A system-program lamport transfer.
pub fn system_transfer(from: &WalletAddress, to: &WalletAddress, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_TAG.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    Instruction {
        program_id: system_program_id(),
        accounts: vec![
            AccountMeta { pubkey: *from, is_signer: true, is_writable: true },
            AccountMeta { pubkey: *to, is_signer: false, is_writable: true },
        ],
        data,
    }
}

/// One lamport movement inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLeg {
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub lamports: u64,
}

// ---------------------------------------------------------------------------
// Compiled message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct MessageHeader {
    num_required_signatures: u8,
    num_readonly_signed: u8,
    num_readonly_unsigned: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CompiledInstruction {
    program_id_index: u8,
    accounts: Vec<u8>,
    data: Vec<u8>,
}

/// A legacy transaction whose signature slots are still empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    header: MessageHeader,
    account_keys: Vec<WalletAddress>,
    recent_blockhash: Blockhash,
    instructions: Vec<CompiledInstruction>,
}

impl UnsignedTransaction {
    /// Compile `instructions` with `payer` as fee payer (first account).
    pub fn new(instructions: &[Instruction], payer: &WalletAddress, recent_blockhash: Blockhash) -> Result<Self> {
        // Collect account metas, payer first, merging duplicate keys.
        let mut metas: Vec<AccountMeta> = vec![AccountMeta {
            pubkey: *payer,
            is_signer: true,
            is_writable: true,
        }];
        let mut upsert = |meta: AccountMeta| {
            if let Some(existing) = metas.iter_mut().find(|m| m.pubkey == meta.pubkey) {
                existing.is_signer |= meta.is_signer;
                existing.is_writable |= meta.is_writable;
            } else {
                metas.push(meta);
            }
        };
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.clone());
            }
            upsert(AccountMeta {
                pubkey: ix.program_id,
                is_signer: false,
                is_writable: false,
            });
        }

        // Order: writable signers, readonly signers, writable non-signers,
        // readonly non-signers. Stable within each class; the payer stays first.
        let class = |m: &AccountMeta| match (m.is_signer, m.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        metas.sort_by_key(class);

        if metas.len() > u8::MAX as usize {
            return Err(PaymentError::TransactionFormat(format!(
                "{} accounts exceed the legacy message limit",
                metas.len()
            )));
        }

        let header = MessageHeader {
            num_required_signatures: metas.iter().filter(|m| m.is_signer).count() as u8,
            num_readonly_signed: metas.iter().filter(|m| class(*m) == 1).count() as u8,
            num_readonly_unsigned: metas.iter().filter(|m| class(*m) == 3).count() as u8,
        };
        let account_keys: Vec<WalletAddress> = metas.iter().map(|m| m.pubkey).collect();
        let index_of = |key: &WalletAddress| -> Result<u8> {
            account_keys
                .iter()
                .position(|k| k == key)
                .map(|i| i as u8)
                .ok_or_else(|| PaymentError::TransactionFormat(format!("account {key} missing")))
        };

        let mut compiled = Vec::with_capacity(instructions.len());
        for ix in instructions {
            let accounts = ix
                .accounts
                .iter()
                .map(|m| index_of(&m.pubkey))
                .collect::<Result<Vec<u8>>>()?;
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                accounts,
                data: ix.data.clone(),
            });
        }

        Ok(Self {
            header,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    pub fn fee_payer(&self) -> &WalletAddress {
        // `new` always places the payer first.
        &self.account_keys[0]
    }

    pub fn recent_blockhash(&self) -> &Blockhash {
        &self.recent_blockhash
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn account_keys(&self) -> &[WalletAddress] {
        &self.account_keys
    }

    /// Decode the system transfers this transaction performs, in order.
    pub fn transfer_legs(&self) -> Vec<TransferLeg> {
        let system = system_program_id();
        self.instructions
            .iter()
            .filter(|ix| self.account_keys.get(ix.program_id_index as usize) == Some(&system))
            .filter_map(|ix| {
                if ix.data.len() != 12 || ix.accounts.len() != 2 {
                    return None;
                }
                let tag = u32::from_le_bytes(ix.data[0..4].try_into().ok()?);
                if tag != SYSTEM_TRANSFER_TAG {
                    return None;
                }
                let lamports = u64::from_le_bytes(ix.data[4..12].try_into().ok()?);
                Some(TransferLeg {
                    from: *self.account_keys.get(ix.accounts[0] as usize)?,
                    to: *self.account_keys.get(ix.accounts[1] as usize)?,
                    lamports,
                })
            })
            .collect()
    }

    /// Serialized message bytes (what signers sign).
    pub fn message_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed);
        out.push(self.header.num_readonly_unsigned);

        write_compact_u16(&mut out, self.account_keys.len());
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }

        out.extend_from_slice(self.recent_blockhash.as_bytes());

        write_compact_u16(&mut out, self.instructions.len());
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            write_compact_u16(&mut out, ix.accounts.len());
            out.extend_from_slice(&ix.accounts);
            write_compact_u16(&mut out, ix.data.len());
            out.extend_from_slice(&ix.data);
        }
        out
    }

    /// Full wire transaction with zero-filled signature slots.
    pub fn serialize(&self) -> Vec<u8> {
        let signers = self.header.num_required_signatures as usize;
        let message = self.message_bytes();

        let mut out = Vec::with_capacity(1 + signers * SIGNATURE_SIZE + message.len());
        write_compact_u16(&mut out, signers);
        out.resize(out.len() + signers * SIGNATURE_SIZE, 0);
        out.extend_from_slice(&message);
        out
    }

    /// Base64 of [`serialize`](Self::serialize), the form wallet transports take.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.serialize())
    }
}

/// Solana "shortvec" length prefix: 7 bits per byte, high bit continues.
fn write_compact_u16(out: &mut Vec<u8>, len: usize) {
    let mut rem = len as u16;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            out.push(byte);
            break;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

// ---------------------------------------------------------------------------
// Fee transactions
// ---------------------------------------------------------------------------

/// Group-creation fee: a single transfer of `amount_sol` to `recipient`.
pub fn build_create_fee_transfer(
    payer: &WalletAddress,
    recipient: &WalletAddress,
    amount_sol: f64,
    recent_blockhash: Blockhash,
) -> Result<UnsignedTransaction> {
    let lamports = sol_to_lamports(amount_sol)?;
    if lamports == 0 {
        return Err(PaymentError::TransactionFormat("creation fee must be positive".into()));
    }
    UnsignedTransaction::new(&[system_transfer(payer, recipient, lamports)], payer, recent_blockhash)
}

/// Group-join fee: platform leg and owner leg in one atomic transaction.
///
/// The platform leg is `total × fee_fraction` rounded to the lamport; the
/// owner leg is the remainder, so the legs sum exactly to the total.
pub fn build_join_fee_transfer(
    payer: &WalletAddress,
    owner_recipient: &WalletAddress,
    platform_recipient: &WalletAddress,
    total_sol: f64,
    platform_fee_fraction: f64,
    recent_blockhash: Blockhash,
) -> Result<UnsignedTransaction> {
    let total = sol_to_lamports(total_sol)?;
    if total == 0 {
        return Err(PaymentError::TransactionFormat(
            "free groups are joined without a payment".into(),
        ));
    }
    let (platform_leg, owner_leg) = split_join_amount(total, platform_fee_fraction)?;

    let instructions = [
        system_transfer(payer, platform_recipient, platform_leg),
        system_transfer(payer, owner_recipient, owner_leg),
    ];
    UnsignedTransaction::new(&instructions, payer, recent_blockhash)
}
