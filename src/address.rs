//! Per-chain address grammar validation.
//!
//! Addresses are validated before a record is accepted for execution.
//! Structural validation only: a well-formed address that does not exist
//! on-chain will surface as an execution failure, not an input error.

use crate::types::ChainId;

/// Decoded byte length of a Solana public key.
const SOLANA_PUBKEY_LEN: usize = 32;

/// Decoded byte length of an SS58 address: 1 prefix byte, 32-byte public
/// key, 2 checksum bytes.
const SS58_ADDRESS_LEN: usize = 35;

/// Validate an address against the given chain's grammar.
pub fn validate(chain: ChainId, address: &str) -> Result<(), AddressError> {
    match chain {
        ChainId::Solana => validate_solana(address),
        ChainId::Lunes => validate_lunes(address),
    }
}

/// Solana addresses are base58-encoded 32-byte public keys; the string form
/// is between 32 and 44 characters.
pub fn validate_solana(address: &str) -> Result<(), AddressError> {
    if address.len() < 32 || address.len() > 44 {
        return Err(AddressError::BadLength {
            chain: ChainId::Solana,
            got: address.len(),
        });
    }
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| AddressError::NotBase58(ChainId::Solana))?;
    if decoded.len() != SOLANA_PUBKEY_LEN {
        return Err(AddressError::BadDecodedLength {
            chain: ChainId::Solana,
            got: decoded.len(),
            want: SOLANA_PUBKEY_LEN,
        });
    }
    Ok(())
}

/// Lunes addresses use the SS58 format: base58 over
/// `prefix || pubkey(32) || checksum(2)`.
pub fn validate_lunes(address: &str) -> Result<(), AddressError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| AddressError::NotBase58(ChainId::Lunes))?;
    if decoded.len() != SS58_ADDRESS_LEN {
        return Err(AddressError::BadDecodedLength {
            chain: ChainId::Lunes,
            got: decoded.len(),
            want: SS58_ADDRESS_LEN,
        });
    }
    Ok(())
}

/// Structural address validation failure. These are input errors: the
/// record carrying the address goes straight to `Failed` and is never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("{chain} address has invalid length {got}")]
    BadLength { chain: ChainId, got: usize },
    #[error("{0} address is not valid base58")]
    NotBase58(ChainId),
    #[error("{chain} address decodes to {got} bytes, expected {want}")]
    BadDecodedLength {
        chain: ChainId,
        got: usize,
        want: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    // A real 32-byte base58 pubkey (from the token contract's own tests).
    const SOLANA_OK: &str = "7EcDhSYGxXyscszYEp35KHN8vvw3svAuLKTzXwCFLtV";

    #[test]
    fn solana_accepts_valid_pubkey() {
        assert!(validate_solana(SOLANA_OK).is_ok());
    }

    #[test]
    fn solana_rejects_short_and_long_strings() {
        assert!(matches!(
            validate_solana("abc"),
            Err(AddressError::BadLength { .. })
        ));
        let long = "1".repeat(45);
        assert!(matches!(
            validate_solana(&long),
            Err(AddressError::BadLength { .. })
        ));
    }

    #[test]
    fn solana_rejects_non_base58() {
        // '0', 'O', 'I', 'l' are not in the base58 alphabet.
        assert_eq!(
            validate_solana("0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl"),
            Err(AddressError::NotBase58(ChainId::Solana))
        );
    }

    #[test]
    fn solana_rejects_wrong_decoded_length() {
        // 31 bytes of data encodes to a string in the accepted char range.
        let short = bs58::encode(vec![7u8; 31]).into_string();
        if (32..=44).contains(&short.len()) {
            assert!(matches!(
                validate_solana(&short),
                Err(AddressError::BadDecodedLength { .. })
            ));
        }
    }

    #[test]
    fn lunes_accepts_ss58_shaped_address() {
        let addr = bs58::encode(vec![42u8; 35]).into_string();
        assert!(validate_lunes(&addr).is_ok());
    }

    #[test]
    fn lunes_rejects_solana_shaped_address() {
        assert!(matches!(
            validate_lunes(SOLANA_OK),
            Err(AddressError::BadDecodedLength { .. })
        ));
    }

    #[test]
    fn validate_dispatches_per_chain() {
        assert!(validate(ChainId::Solana, SOLANA_OK).is_ok());
        assert!(validate(ChainId::Lunes, SOLANA_OK).is_err());
    }
}
