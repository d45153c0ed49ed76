//! SOL amounts cross the API as decimal floats; instructions and
//! comparisons use integral lamports.

use crate::constants::LAMPORTS_PER_SOL;
use crate::error::CodecError;

/// Convert a decimal SOL amount to lamports, rounding to the nearest lamport.
pub fn sol_to_lamports(sol: f64) -> Result<u64, CodecError> {
    if !sol.is_finite() {
        return Err(CodecError::InvalidAmount(format!("{sol} is not a finite number")));
    }
    if sol < 0.0 {
        return Err(CodecError::InvalidAmount(format!("{sol} is negative")));
    }

    let lamports = (sol * LAMPORTS_PER_SOL as f64).round();
    if lamports >= u64::MAX as f64 {
        return Err(CodecError::InvalidAmount(format!("{sol} SOL overflows lamports")));
    }
    Ok(lamports as u64)
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Split a join payment into `(platform_leg, owner_leg)` lamports.
///
/// The owner leg is the remainder, so the two legs always sum to
/// `total_lamports` exactly.
pub fn split_join_amount(total_lamports: u64, fee_fraction: f64) -> Result<(u64, u64), CodecError> {
    if !(0.0..=1.0).contains(&fee_fraction) {
        return Err(CodecError::InvalidAmount(format!(
            "platform fee fraction {fee_fraction} outside [0, 1]"
        )));
    }
    let platform = ((total_lamports as f64) * fee_fraction).round() as u64;
    let platform = platform.min(total_lamports);
    Ok((platform, total_lamports - platform))
}

/// Price equality at lamport precision. Unparseable prices never match.
pub fn prices_match(a: f64, b: f64) -> bool {
    match (sol_to_lamports(a), sol_to_lamports(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn is_free(price: f64) -> bool {
    prices_match(price, 0.0)
}
