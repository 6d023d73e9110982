//! MAC addresses for virtual NICs.

use crate::error::{CoreError, Result};
use rand::Rng;

/// Locally administered prefix used by QEMU for generated NICs.
const PREFIX: [u8; 3] = [0x52, 0x54, 0x00];

/// Generate a random address below the `52:54:00` prefix.
pub fn random_hw_address() -> String {
    let mut rng = rand::rng();
    let tail: [u8; 3] = rng.random();
    PREFIX
        .iter()
        .chain(tail.iter())
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Check `aa:bb:cc:dd:ee:ff` syntax and return the lowercase form.
///
/// Addresses end up in file names, command lines and URL paths, so nothing
/// but six colon separated hex octets is accepted.
pub fn normalize_hw_address(address: &str) -> Result<String> {
    let octets: Vec<&str> = address.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(CoreError::InvalidArgument(format!(
            "invalid hardware address '{address}'"
        )));
    }
    Ok(address.to_ascii_lowercase())
}
