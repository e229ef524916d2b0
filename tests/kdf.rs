// Key derivation: hardened defaults, minima and determinism.
use file_guard::{
    DerivedKey, GuardError, KdfAlg, KdfParams, MIN_PBKDF2_ITERATIONS, Salt, derive_key,
    generate_salt, validate_params,
};
use secrecy::SecretString;

fn pw(s: &str) -> SecretString {
    SecretString::new(s.into())
}

fn fast() -> KdfParams {
    KdfParams {
        iterations: MIN_PBKDF2_ITERATIONS,
        ..Default::default()
    }
}

#[test]
fn kdf_default_parameters_are_hardened() {
    let defaults = KdfParams::default();
    assert_eq!(defaults.alg, KdfAlg::Pbkdf2Sha256);
    assert_eq!(defaults.iterations, 480_000);
    assert!(defaults.salt_len >= 16);
    assert!(defaults.argon2_t_cost >= 3);
    assert!(defaults.argon2_mem_kib >= 65536);
    assert!((1..=4).contains(&defaults.argon2_parallelism));
    validate_params(&defaults).unwrap();
}

#[test]
fn kdf_validation_enforces_minima() {
    let salt = Salt::from_bytes(vec![5u8; 16]);

    let few_iterations = KdfParams {
        iterations: MIN_PBKDF2_ITERATIONS - 1,
        ..Default::default()
    };
    assert!(matches!(
        derive_key(&pw("x"), &salt, &few_iterations),
        Err(GuardError::Invalid(_))
    ));

    let short_salt = Salt::from_bytes(vec![5u8; 4]);
    assert!(matches!(
        derive_key(&pw("x"), &short_salt, &fast()),
        Err(GuardError::Invalid(_))
    ));

    let weak_argon = KdfParams {
        alg: KdfAlg::Argon2id,
        argon2_mem_kib: 1024,
        ..Default::default()
    };
    assert!(validate_params(&weak_argon).is_err());

    let no_lanes = KdfParams {
        alg: KdfAlg::Argon2id,
        argon2_parallelism: 0,
        ..Default::default()
    };
    assert!(validate_params(&no_lanes).is_err());
}

#[test]
fn same_inputs_same_key_different_salt_different_key() {
    let s1 = generate_salt(16).unwrap();
    let s2 = generate_salt(16).unwrap();
    assert_ne!(s1, s2, "salts must be fresh");

    let k1 = derive_key(&pw("pw"), &s1, &fast()).unwrap();
    let k1_again = derive_key(&pw("pw"), &s1, &fast()).unwrap();
    let k2 = derive_key(&pw("pw"), &s2, &fast()).unwrap();
    assert_eq!(k1, k1_again);
    assert_ne!(k1, k2);
}

#[test]
fn salt_survives_text_encoding() {
    let salt = generate_salt(16).unwrap();
    let text = salt.to_text();
    let back = Salt::from_text(&text).unwrap();
    let a = derive_key(&pw("pw"), &salt, &fast()).unwrap();
    let b = derive_key(&pw("pw"), &back, &fast()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn argon2id_is_deterministic_and_differs_from_pbkdf2() {
    let salt = Salt::from_bytes(vec![3u8; 16]);
    let argon = KdfParams {
        alg: KdfAlg::Argon2id,
        argon2_parallelism: 1,
        ..Default::default()
    };
    let a = derive_key(&pw("pw"), &salt, &argon).unwrap();
    let b = derive_key(&pw("pw"), &salt, &argon).unwrap();
    let p = derive_key(&pw("pw"), &salt, &fast()).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, p);
}

#[test]
fn derived_key_debug_is_redacted() {
    let key = DerivedKey::from_bytes([0xAB; 32]);
    let shown = format!("{key:?}");
    assert!(!shown.to_lowercase().contains("ab, "));
    assert!(!shown.to_lowercase().contains("abab"));
    assert!(shown.contains("redacted"));
}
