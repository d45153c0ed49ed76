//! Server-side payment verification: does a confirmed transaction actually
//! move the expected lamports from the expected payer?

use std::collections::HashMap;

use tracing::{debug, warn};

use mastermind_shared::{TransactionSignature, WalletAddress};

use crate::chain::ChainClient;
use crate::error::{PaymentError, Result};

/// A recipient that must receive at least `min_lamports` from the payer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedLeg {
    pub to: WalletAddress,
    pub min_lamports: u64,
}

/// Verify `signature` is a confirmed, successful transaction paid by `payer`
/// that covers every expected leg. Legs to the same recipient are summed.
pub async fn verify_payment(
    chain: &dyn ChainClient,
    signature: &TransactionSignature,
    payer: &WalletAddress,
    expected: &[ExpectedLeg],
) -> Result<()> {
    signature.to_bytes()?;

    let transfers = chain
        .confirmed_transfers(signature)
        .await?
        .ok_or_else(|| {
            PaymentError::VerificationFailed(format!("transaction {signature} is not confirmed"))
        })?;

    if transfers.fee_payer != *payer {
        warn!(
            signature = %signature,
            fee_payer = %transfers.fee_payer,
            expected = %payer,
            "Payment fee payer mismatch"
        );
        return Err(PaymentError::VerificationFailed(format!(
            "transaction was paid by {}, not {payer}",
            transfers.fee_payer
        )));
    }

    let mut received: HashMap<WalletAddress, u64> = HashMap::new();
    for leg in transfers.legs.iter().filter(|l| l.from == *payer) {
        *received.entry(leg.to).or_default() += leg.lamports;
    }

    let mut required: HashMap<WalletAddress, u64> = HashMap::new();
    for leg in expected {
        *required.entry(leg.to).or_default() += leg.min_lamports;
    }

    for (to, min) in required {
        let got = received.get(&to).copied().unwrap_or(0);
        if got < min {
            return Err(PaymentError::VerificationFailed(format!(
                "{to} received {got} lamports, expected at least {min}"
            )));
        }
    }

    debug!(signature = %signature, payer = %payer, "Payment verified on-chain");
    Ok(())
}
