use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::error::{AppError, Result};

fn invalid_signature(reason: &str) -> AppError {
    AppError::wallet(None, format!("Wallet returned an invalid signature ({reason})"))
}

pub fn validate_wallet_address(wallet: &str) -> Result<[u8; 32]> {
    let decoded = bs58::decode(wallet)
        .into_vec()
        .map_err(|_| AppError::wallet(None, "Invalid wallet address format"))?;

    decoded
        .try_into()
        .map_err(|_| AppError::wallet(None, "Invalid wallet address: must be 32 bytes"))
}

/// Checks a base58 ed25519 signature over `message` against a base58 wallet
/// address.
pub fn verify_signature(wallet: &str, message: &str, signature: &str) -> Result<()> {
    let pubkey_array = validate_wallet_address(wallet)?;

    let verifying_key =
        VerifyingKey::from_bytes(&pubkey_array).map_err(|_| invalid_signature("bad key"))?;

    let signature_bytes = bs58::decode(signature)
        .into_vec()
        .map_err(|_| invalid_signature("not base58"))?;

    let signature_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| invalid_signature("must be 64 bytes"))?;

    let byte_signature = Signature::from_bytes(&signature_array);

    verifying_key
        .verify(message.as_bytes(), &byte_signature)
        .map_err(|_| invalid_signature("does not match message"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    fn keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let wallet = bs58::encode(signing_key.verifying_key().as_bytes()).into_string();
        (signing_key, wallet)
    }

    #[test]
    fn accepts_matching_signature() {
        let (signing_key, wallet) = keypair();
        let signature = bs58::encode(signing_key.sign(b"Bind W/N").to_bytes()).into_string();

        assert!(verify_signature(&wallet, "Bind W/N", &signature).is_ok());
    }

    #[test]
    fn rejects_signature_over_other_message() {
        let (signing_key, wallet) = keypair();
        let signature = bs58::encode(signing_key.sign(b"Bind W/OLD").to_bytes()).into_string();

        assert!(matches!(
            verify_signature(&wallet, "Bind W/NEW", &signature),
            Err(AppError::Wallet { .. })
        ));
    }

    #[test]
    fn rejects_short_address() {
        assert!(validate_wallet_address("abc").is_err());
    }
}
