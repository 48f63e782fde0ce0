//! Destination address validation.

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};

use custody_types::{LedgerError, Result};

/// Trim and check that `address` is a valid address on `network`.
/// Returns the normalized string.
pub fn validate_address(address: &str, network: Network) -> Result<String> {
    let trimmed = address.trim();
    let invalid = || LedgerError::InvalidAddress {
        address: trimmed.to_string(),
    };
    let unchecked: Address<NetworkUnchecked> = trimmed.parse().map_err(|_| invalid())?;
    unchecked.require_network(network).map_err(|_| invalid())?;
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_mainnet_formats() {
        for addr in [
            "1BoatSLRHtKNngkdXEeobR76b53LETtpyT",
            "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
        ] {
            assert_eq!(validate_address(addr, Network::Bitcoin).unwrap(), addr);
        }
    }

    #[test]
    fn trims_whitespace() {
        let got = validate_address("  1BoatSLRHtKNngkdXEeobR76b53LETtpyT\n", Network::Bitcoin).unwrap();
        assert_eq!(got, "1BoatSLRHtKNngkdXEeobR76b53LETtpyT");
    }

    #[test]
    fn rejects_garbage_and_wrong_network() {
        assert!(matches!(
            validate_address("not-an-address", Network::Bitcoin),
            Err(LedgerError::InvalidAddress { .. })
        ));
        assert!(validate_address("", Network::Bitcoin).is_err());
        assert!(validate_address("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", Network::Testnet).is_err());
    }
}
