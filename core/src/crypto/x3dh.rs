//! X3DH (Extended Triple Diffie-Hellman) Key Agreement
//!
//! X3DH lets Alice derive a shared secret with Bob while Bob is offline,
//! using the key bundle Bob published in advance.
//!
//! ## Protocol Overview
//!
//! 1. Bob publishes his identity key, signed prekey and one-time prekeys
//! 2. Alice fetches a key bundle (taking at most one one-time prekey)
//! 3. Alice verifies the prekey signature and computes:
//!    - DH1 = DH(IK_A, SPK_B)
//!    - DH2 = DH(EK_A, IK_B)
//!    - DH3 = DH(EK_A, SPK_B)
//!    - DH4 = DH(EK_A, OPK_B) [optional, if a one-time prekey was available]
//! 4. SK = expand(DH1 || DH2 || DH3 [|| DH4])
//! 5. Alice sends an [`X3dhHeader`] with her identity key, ephemeral key and
//!    the id of the one-time prekey she used
//! 6. Bob repeats the DH computations from his side; each term commutes, so
//!    both arrive at the same SK

use crate::crypto::errors::CryptoResult;
use crate::crypto::kdf::expand_default;
use crate::crypto::keys::{dh, random_key_pair, PublicKeyBundle, KEY_LEN};
use crate::crypto::prekeys::{KeyBundle, User};
use crate::wire::{field_array, Value, WireRecord, WireResult};

/// Shared secret produced by the handshake
pub type SharedSecret = [u8; KEY_LEN];

/// Information sent from initiator to responder with the first message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X3dhHeader {
    /// Initiator's identity public key
    pub identity_key: PublicKeyBundle,
    /// Initiator's ephemeral public key
    pub ephemeral_key: PublicKeyBundle,
    /// ID of the one-time prekey that was used (if any)
    pub one_time_prekey_id: Option<String>,
}

impl WireRecord for X3dhHeader {
    const NAME: &'static str = "x3dh_header";
    const FIELDS: &'static [&'static str] = &["identity_key", "ephemeral_key", "one_time_prekey_id"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::record(&self.identity_key),
            Value::record(&self.ephemeral_key),
            self.one_time_prekey_id
                .as_deref()
                .map_or_else(Value::none, Value::from),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [identity_key, ephemeral_key, one_time_prekey_id] = field_array(Self::NAME, fields)?;
        Ok(Self {
            identity_key: identity_key.into_record()?,
            ephemeral_key: ephemeral_key.into_record()?,
            one_time_prekey_id: one_time_prekey_id.into_optional(Value::into_text)?,
        })
    }
}

fn derive_secret(terms: &[[u8; KEY_LEN]]) -> SharedSecret {
    expand_default(&terms.concat())
}

/// Perform X3DH key agreement (initiator side)
///
/// Fails with `AuthenticationFailure` if the bundle's prekey signature does
/// not verify. A bundle without a one-time prekey still succeeds, with
/// reduced forward secrecy for the first message.
pub fn x3dh_send(sender: &User, bundle: &KeyBundle) -> CryptoResult<(SharedSecret, X3dhHeader)> {
    bundle.verify()?;
    let prekey = bundle.prekey_public()?;

    let ephemeral = random_key_pair();
    let identity = sender.identity();

    let dh1 = identity.diffie_hellman(&prekey);
    let dh2 = dh(&ephemeral, &bundle.identity_key);
    let dh3 = ephemeral.diffie_hellman(&prekey);

    let mut header = X3dhHeader {
        identity_key: *identity.public(),
        ephemeral_key: *ephemeral.public(),
        one_time_prekey_id: None,
    };

    let secret = match &bundle.one_time_prekey {
        Some(one_time_prekey) => {
            let dh4 = dh(&ephemeral, one_time_prekey);
            header.one_time_prekey_id = Some(one_time_prekey.id());
            derive_secret(&[dh1, dh2, dh3, dh4])
        }
        None => {
            tracing::warn!(
                recipient = %bundle.identity_key.id(),
                "No one-time prekey available, proceeding with reduced forward secrecy"
            );
            derive_secret(&[dh1, dh2, dh3])
        }
    };

    tracing::debug!(
        sender = %sender.name(),
        ephemeral = %header.ephemeral_key.id(),
        "X3DH initiated"
    );
    Ok((secret, header))
}

/// Derive the responder's secret without consuming the one-time prekey
///
/// Runs the same `Replay` / `UnknownKey` checks as [`x3dh_receive`]. The
/// prekey stays in the pool until [`consume_one_time_prekey`] is called, so
/// a handshake rejected later (e.g. a forged initial message) does not burn
/// it.
pub fn x3dh_derive(recipient: &User, header: &X3dhHeader) -> CryptoResult<SharedSecret> {
    let prekey = recipient.signed_prekey();

    let dh1 = dh(prekey, &header.identity_key);
    let dh2 = dh(recipient.identity(), &header.ephemeral_key);
    let dh3 = dh(prekey, &header.ephemeral_key);

    let Some(prekey_id) = &header.one_time_prekey_id else {
        tracing::warn!(
            recipient = %recipient.name(),
            "No one-time prekey in X3DH header, first message has degraded forward secrecy"
        );
        return Ok(derive_secret(&[dh1, dh2, dh3]));
    };

    let one_time_prekey = recipient.one_time_prekey(prekey_id)?;
    let dh4 = dh(one_time_prekey, &header.ephemeral_key);
    Ok(derive_secret(&[dh1, dh2, dh3, dh4]))
}

/// Move the one-time prekey referenced by `header` (if any) to the
/// recipient's consumed set
pub fn consume_one_time_prekey(recipient: &mut User, header: &X3dhHeader) -> CryptoResult<()> {
    if let Some(prekey_id) = &header.one_time_prekey_id {
        recipient.take_one_time_prekey(prekey_id)?;
        tracing::debug!(
            recipient = %recipient.name(),
            one_time_prekey = %prekey_id,
            "X3DH completed, one-time prekey consumed"
        );
    }
    Ok(())
}

/// Perform X3DH key agreement (responder side)
///
/// A referenced one-time prekey is consumed: presenting the same id again
/// fails with `Replay`, an id this user never issued fails with
/// `UnknownKey`.
pub fn x3dh_receive(recipient: &mut User, header: &X3dhHeader) -> CryptoResult<SharedSecret> {
    let secret = x3dh_derive(recipient, header)?;
    consume_one_time_prekey(recipient, header)?;
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::prekeys::MemoryPrekeyDirectory;
    use crate::crypto::CryptoError;
    use crate::logging::capture_logs;
    use crate::wire::Registry;

    fn users(directory: &MemoryPrekeyDirectory) -> (User, User) {
        (User::new("alice", directory, 3), User::new("bob", directory, 3))
    }

    #[test]
    fn test_x3dh_key_agreement() {
        let directory = MemoryPrekeyDirectory::new();
        let (alice, mut bob) = users(&directory);

        let (alice_secret, header) = x3dh_send(&alice, &bob.key_bundle(&directory)).unwrap();
        assert!(header.one_time_prekey_id.is_some());

        let bob_secret = x3dh_receive(&mut bob, &header).unwrap();
        assert_eq!(alice_secret, bob_secret);
        assert_eq!(bob.one_time_prekey_count(), 2);
    }

    #[test]
    fn test_x3dh_without_one_time_prekey() {
        let directory = MemoryPrekeyDirectory::new();
        let alice = User::new("alice", &directory, 0);
        let mut bob = User::new("bob", &directory, 0);

        let bundle = bob.key_bundle(&directory);
        assert!(bundle.one_time_prekey.is_none());

        let mut sent = None;
        let send_logs = capture_logs(|| sent = Some(x3dh_send(&alice, &bundle).unwrap()));
        let (alice_secret, header) = sent.unwrap();
        assert_eq!(header.one_time_prekey_id, None);
        assert!(send_logs.contains("WARN"));
        assert!(send_logs.contains("reduced forward secrecy"));

        let mut received = None;
        let receive_logs = capture_logs(|| received = Some(x3dh_receive(&mut bob, &header)));
        assert_eq!(alice_secret, received.unwrap().unwrap());
        assert!(receive_logs.contains("degraded forward secrecy"));
    }

    #[test]
    fn test_replayed_header_rejected() {
        let directory = MemoryPrekeyDirectory::new();
        let (alice, mut bob) = users(&directory);

        let (_, header) = x3dh_send(&alice, &bob.key_bundle(&directory)).unwrap();
        assert!(x3dh_receive(&mut bob, &header).is_ok());
        assert!(matches!(
            x3dh_receive(&mut bob, &header),
            Err(CryptoError::Replay(_))
        ));
    }

    #[test]
    fn test_derive_does_not_consume() {
        let directory = MemoryPrekeyDirectory::new();
        let (alice, mut bob) = users(&directory);

        let (alice_secret, header) = x3dh_send(&alice, &bob.key_bundle(&directory)).unwrap();
        assert_eq!(x3dh_derive(&bob, &header).unwrap(), alice_secret);
        assert_eq!(x3dh_derive(&bob, &header).unwrap(), alice_secret);
        assert_eq!(bob.one_time_prekey_count(), 3);

        consume_one_time_prekey(&mut bob, &header).unwrap();
        assert_eq!(bob.one_time_prekey_count(), 2);
        assert!(matches!(
            x3dh_derive(&bob, &header),
            Err(CryptoError::Replay(_))
        ));
    }

    #[test]
    fn test_wrong_recipient_rejected() {
        let directory = MemoryPrekeyDirectory::new();
        let (alice, bob) = users(&directory);
        let mut charlie = User::new("charlie", &directory, 3);

        let (_, header) = x3dh_send(&alice, &bob.key_bundle(&directory)).unwrap();
        assert!(matches!(
            x3dh_receive(&mut charlie, &header),
            Err(CryptoError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_invalid_bundle_signature() {
        let directory = MemoryPrekeyDirectory::new();
        let (alice, bob) = users(&directory);

        let mut bundle = bob.key_bundle(&directory);
        bundle.signed_prekey.signature[5] ^= 0x01;
        assert!(matches!(
            x3dh_send(&alice, &bundle),
            Err(CryptoError::AuthenticationFailure(_))
        ));
    }

    #[test]
    fn test_secrets_differ_per_handshake() {
        let directory = MemoryPrekeyDirectory::new();
        let (alice, bob) = users(&directory);

        let (first, _) = x3dh_send(&alice, &bob.key_bundle(&directory)).unwrap();
        let (second, _) = x3dh_send(&alice, &bob.key_bundle(&directory)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_header_wire_roundtrip() {
        let registry = Registry::standard();
        let directory = MemoryPrekeyDirectory::new();
        let (alice, bob) = users(&directory);

        let (_, header) = x3dh_send(&alice, &bob.key_bundle(&directory)).unwrap();
        let bytes = registry.serialize(&header).unwrap();
        let (decoded, rest) = registry.deserialize::<X3dhHeader>(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, header);
    }
}
