//! Full roundtrip integration smoke test for circlevault-crypto.
//!
//! Exercises the complete key chain between two members: key pair creation,
//! password-locked private keys, a circle key wrapped for both trustees,
//! record encryption under per-record IVs sealed by the MasterKey, and
//! signatures over the stored ciphertext.

use circlevault_crypto::master_key::MasterKey;
use circlevault_crypto::{Algorithm, Crypto, CryptoError, CryptoSettings, IVSalt, PbeParams};

fn crypto() -> Crypto {
    Crypto::new(CryptoSettings {
        pbe_iterations: 1,
        pbe_memory_kib: 64,
        ..CryptoSettings::default()
    })
    .unwrap()
}

const FAST_MASTER: PbeParams = PbeParams {
    algorithm: Algorithm::Pbe256,
    iterations: 1,
    memory_kib: 64,
};

/// What the store would hold for one member.
struct StoredMember {
    salt: IVSalt,
    armored_public: String,
    armored_private: String,
}

fn create_member(crypto: &Crypto, password: &str) -> StoredMember {
    let salt = IVSalt::random();
    let (public, private) = crypto.generate_asymmetric(Algorithm::Curve25519).unwrap();
    let mut unlock = crypto
        .generate_password_key(Algorithm::Pbe256, password.as_bytes(), &salt)
        .unwrap();
    let armored_private = crypto.encrypt_and_armor_private(&unlock, &private).unwrap();
    unlock.destroy();
    StoredMember {
        salt,
        armored_public: crypto.armor_public(&public).unwrap(),
        armored_private,
    }
}

#[test]
fn full_roundtrip_two_trustees() {
    let crypto = crypto();
    let master = MasterKey::derive_default(&crypto, &FAST_MASTER, "integration salt").unwrap();

    // -- Step 1: two members with password-locked key pairs --
    let alice = create_member(&crypto, "alice password");
    let bob = create_member(&crypto, "bob password");

    // -- Step 2: a circle key wrapped for both --
    let circle_key = crypto.generate_symmetric(Algorithm::Aes256).unwrap();
    let alice_copy = crypto
        .encrypt_and_armor_circle_key(&crypto.dearmor_public(&alice.armored_public).unwrap(), &circle_key)
        .unwrap();
    let bob_copy = crypto
        .encrypt_and_armor_circle_key(&crypto.dearmor_public(&bob.armored_public).unwrap(), &circle_key)
        .unwrap();
    assert_ne!(alice_copy, bob_copy);

    // -- Step 3: Alice unlocks and writes a record --
    let alice_unlock = crypto
        .generate_password_key(Algorithm::Pbe256, b"alice password", &alice.salt)
        .unwrap();
    let alice_private = crypto
        .dearmor_private(&alice_unlock, &alice.armored_private)
        .unwrap();
    let iv = IVSalt::random();
    let sealed_iv = master.seal_salt(&iv).unwrap();
    let write_key = crypto
        .extract_circle_key(Algorithm::Aes256, &alice_private, &alice_copy)
        .unwrap()
        .with_salt(iv);
    let ciphertext = crypto.encrypt(&write_key, b"shared secret record").unwrap();
    let checksum = crypto.armored_checksum(&ciphertext).unwrap();
    let signature = crypto.sign(&alice_private, &ciphertext).unwrap();

    // -- Step 4: Bob reads it with his own copy --
    let bob_unlock = crypto
        .generate_password_key(Algorithm::Pbe256, b"bob password", &bob.salt)
        .unwrap();
    let bob_private = crypto.dearmor_private(&bob_unlock, &bob.armored_private).unwrap();
    assert!(crypto.verify_checksum(&ciphertext, &checksum).unwrap());
    let read_key = crypto
        .extract_circle_key(Algorithm::Aes256, &bob_private, &bob_copy)
        .unwrap()
        .with_salt(master.open_salt(&sealed_iv).unwrap());
    assert_eq!(
        crypto.decrypt(&read_key, &ciphertext).unwrap(),
        b"shared secret record"
    );

    // -- Step 5: signature verifies under Alice's armored public key --
    let alice_public = crypto.dearmor_public(&alice.armored_public).unwrap();
    assert!(crypto.verify(&alice_public, &ciphertext, &signature).unwrap());
    let bob_public = crypto.dearmor_public(&bob.armored_public).unwrap();
    assert!(!crypto.verify(&bob_public, &ciphertext, &signature).unwrap());
}

#[test]
fn trustee_copy_does_not_open_with_other_private_key() {
    let crypto = crypto();
    let alice = create_member(&crypto, "alice password");
    let bob = create_member(&crypto, "bob password");

    let circle_key = crypto.generate_symmetric(Algorithm::Aes128).unwrap();
    let alice_copy = crypto
        .encrypt_and_armor_circle_key(&crypto.dearmor_public(&alice.armored_public).unwrap(), &circle_key)
        .unwrap();

    let bob_unlock = crypto
        .generate_password_key(Algorithm::Pbe256, b"bob password", &bob.salt)
        .unwrap();
    let bob_private = crypto.dearmor_private(&bob_unlock, &bob.armored_private).unwrap();
    let result = crypto.extract_circle_key(Algorithm::Aes128, &bob_private, &alice_copy);
    assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
}

#[test]
fn destroyed_session_keys_stop_working() {
    let crypto = crypto();
    let member = create_member(&crypto, "pw");
    let unlock = crypto
        .generate_password_key(Algorithm::Pbe256, b"pw", &member.salt)
        .unwrap();
    let mut private = crypto.dearmor_private(&unlock, &member.armored_private).unwrap();

    let circle_key = crypto.generate_symmetric(Algorithm::Aes256).unwrap();
    let copy = crypto
        .encrypt_and_armor_circle_key(&crypto.dearmor_public(&member.armored_public).unwrap(), &circle_key)
        .unwrap();

    private.destroy();
    private.destroy();
    assert!(matches!(
        crypto.extract_circle_key(Algorithm::Aes256, &private, &copy),
        Err(CryptoError::KeyDestroyed("private"))
    ));
}
