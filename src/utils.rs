//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

// time-ordered unique id, bech32m encoded under `hrp`
pub fn new_reference_id(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}
