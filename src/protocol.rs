/// Protocol Validator
///
/// Pure functions, no I/O. Processors fetch the state they need through the
/// per-block Context and hand plain values in here, so every rule is
/// replayable and unit-testable in isolation.

use crate::constants::{AMOUNT_MAX, DECIMALS_MAX, TICKER_MAX_LEN, TICKER_MIN_LEN};
use crate::types::{DeployRecord, ErrorCode, SupplyState};

/// Normalize a raw ticker to its canonical uppercase form.
///
/// Accepted: 1 to 8 ASCII characters from [A-Za-z0-9_]. The normalized
/// form is the primary key across balances, deploys and supplies, so two
/// tickers differing only in case collide by design.
pub fn normalize_ticker(raw: &str) -> Result<String, ErrorCode> {
    let len = raw.len();
    if len < TICKER_MIN_LEN || len > TICKER_MAX_LEN {
        return Err(ErrorCode::InvalidTicker);
    }
    if !raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(ErrorCode::InvalidTicker);
    }
    Ok(raw.to_ascii_uppercase())
}

/// Parse a `dec` field. Must be a plain decimal integer in [0, 18] with no
/// leading zeros ("0" itself is fine).
pub fn parse_decimals(raw: &str) -> Result<u8, ErrorCode> {
    if raw.is_empty() || raw.len() > 2 {
        return Err(ErrorCode::InvalidAmount);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ErrorCode::InvalidAmount);
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return Err(ErrorCode::InvalidAmount);
    }
    let value: u8 = raw.parse().map_err(|_| ErrorCode::InvalidAmount)?;
    if value > DECIMALS_MAX {
        return Err(ErrorCode::InvalidAmount);
    }
    Ok(value)
}

/// Parse a decimal-string amount into integer base units.
///
/// Canonical form only: integer part is "0" or starts with [1-9]; an
/// optional fractional part carries 1..=decimals digits. No signs, no
/// exponents, no whitespace. Zero is representable; callers reject it where
/// it is meaningless.
pub fn parse_amount(raw: &str, decimals: u8) -> Result<u128, ErrorCode> {
    if raw.is_empty() {
        return Err(ErrorCode::InvalidAmount);
    }

    let (int_part, frac_part) = match raw.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (raw, None),
    };

    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ErrorCode::InvalidAmount);
    }
    if int_part.len() > 1 && int_part.starts_with('0') {
        return Err(ErrorCode::InvalidAmount);
    }

    let frac_digits = match frac_part {
        Some(f) => {
            if f.is_empty()
                || f.len() > decimals as usize
                || !f.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(ErrorCode::InvalidAmount);
            }
            f
        }
        None => "",
    };

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or(ErrorCode::InvalidAmount)?;
    let int_value: u128 = int_part.parse().map_err(|_| ErrorCode::InvalidAmount)?;
    let mut value = int_value
        .checked_mul(scale)
        .ok_or(ErrorCode::InvalidAmount)?;

    if !frac_digits.is_empty() {
        let frac_value: u128 = frac_digits.parse().map_err(|_| ErrorCode::InvalidAmount)?;
        let frac_scale = 10u128
            .checked_pow((decimals as usize - frac_digits.len()) as u32)
            .ok_or(ErrorCode::InvalidAmount)?;
        value = value
            .checked_add(
                frac_value
                    .checked_mul(frac_scale)
                    .ok_or(ErrorCode::InvalidAmount)?,
            )
            .ok_or(ErrorCode::InvalidAmount)?;
    }

    if value > AMOUNT_MAX {
        return Err(ErrorCode::InvalidAmount);
    }
    Ok(value)
}

/// Deploy rules. `already_deployed` is the universal-namespace check result
/// seen through the block Context, so a deploy earlier in the same block
/// blocks a later one.
pub fn validate_deploy(
    max_supply: u128,
    limit_per_mint: Option<u128>,
    already_deployed: bool,
) -> Result<(), ErrorCode> {
    if already_deployed {
        return Err(ErrorCode::TickerAlreadyDeployed);
    }
    if max_supply == 0 {
        return Err(ErrorCode::InvalidAmount);
    }
    if let Some(limit) = limit_per_mint {
        if limit > max_supply {
            return Err(ErrorCode::InvalidAmount);
        }
    }
    Ok(())
}

/// Mint rules against the deploy and the current (committed + intra-block)
/// supply view. Burned units count against max_supply, keeping the
/// `remaining >= 0` invariant unconditional.
pub fn validate_mint(
    deploy: &DeployRecord,
    supply: &SupplyState,
    amount: u128,
) -> Result<(), ErrorCode> {
    if amount == 0 {
        return Err(ErrorCode::InvalidAmount);
    }
    if let Some(limit) = deploy.limit_per_mint {
        if amount > limit {
            return Err(ErrorCode::MintExceedsLimit);
        }
    }
    let committed = supply.committed();
    if committed.checked_add(amount).is_none()
        || committed + amount > deploy.max_supply
    {
        return Err(ErrorCode::MintExceedsSupply);
    }
    Ok(())
}

/// Transfer rules against the sender's available balance (committed +
/// intra-block delta). `amount` is the total over all receivers.
pub fn validate_transfer(available: u128, amount: u128) -> Result<(), ErrorCode> {
    if amount == 0 {
        return Err(ErrorCode::InvalidAmount);
    }
    if amount > available {
        return Err(ErrorCode::InsufficientBalance);
    }
    Ok(())
}
