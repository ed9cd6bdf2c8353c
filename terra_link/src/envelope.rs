//! Envelope signing and signature verification.

use uuid::Uuid;

use terra_common::clock::wall_clock_ms;
use terra_common::types::command::{Command, CommandEnvelope};

use crate::cert::{hmac_hex, hmac_verify};
use crate::error::LinkError;

/// Build and sign a fresh envelope for `command` under `key`.
pub fn make_envelope(command: Command, key: &[u8]) -> Result<CommandEnvelope, LinkError> {
    let mut envelope = CommandEnvelope {
        id: Uuid::new_v4(),
        command,
        timestamp_ms: wall_clock_ms(),
        signature: String::new(),
        nonce: None,
    };
    sign_envelope(&mut envelope, key)?;
    Ok(envelope)
}

/// Sign (or re-sign) an envelope in place.
pub fn sign_envelope(envelope: &mut CommandEnvelope, key: &[u8]) -> Result<(), LinkError> {
    let bytes = envelope
        .signable_bytes()
        .map_err(|e| LinkError::InvalidFormat(format!("payload: {e}")))?;
    envelope.signature = hmac_hex(key, &bytes);
    Ok(())
}

/// Verify the envelope signature against the client's certificate key.
pub fn verify_signature(envelope: &CommandEnvelope, key: &[u8]) -> Result<(), LinkError> {
    let bytes = envelope
        .signable_bytes()
        .map_err(|e| LinkError::InvalidFormat(format!("payload: {e}")))?;
    if hmac_verify(key, &bytes, &envelope.signature) {
        Ok(())
    } else {
        Err(LinkError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Vec<u8> {
        vec![7u8; 32]
    }

    #[test]
    fn sign_verify_round_trip() {
        let env = make_envelope(
            Command::Move {
                speed: 1.0,
                direction: 0.5,
            },
            &key(),
        )
        .unwrap();
        verify_signature(&env, &key()).unwrap();
    }

    #[test]
    fn wrong_key_rejects() {
        let env = make_envelope(Command::Stop {}, &key()).unwrap();
        assert!(matches!(
            verify_signature(&env, &[9u8; 32]),
            Err(LinkError::SignatureInvalid)
        ));
    }

    #[test]
    fn payload_tamper_rejects() {
        // One changed payload byte must invalidate the signature.
        let mut env = make_envelope(
            Command::Move {
                speed: 1.0,
                direction: 0.0,
            },
            &key(),
        )
        .unwrap();
        env.command = Command::Move {
            speed: 1.0,
            direction: 1.0,
        };
        assert!(matches!(
            verify_signature(&env, &key()),
            Err(LinkError::SignatureInvalid)
        ));
    }

    #[test]
    fn timestamp_tamper_rejects() {
        let mut env = make_envelope(Command::Stop {}, &key()).unwrap();
        env.timestamp_ms += 1;
        assert!(verify_signature(&env, &key()).is_err());
    }

    #[test]
    fn signature_flip_rejects() {
        let mut env = make_envelope(Command::Stop {}, &key()).unwrap();
        // Flip one hex digit of the tag.
        let mut sig: Vec<char> = env.signature.chars().collect();
        sig[0] = if sig[0] == '0' { '1' } else { '0' };
        env.signature = sig.into_iter().collect();
        assert!(verify_signature(&env, &key()).is_err());
    }
}
