//! Crypto utilities providing necessary DLC specific functions not available in
//! rust-secp256k1 or rust-secp256k1-zkp.

use crate::Error;
use bitcoin::hashes::Hash;
use bitcoin::hashes::*;
use bitcoin::KeyPair;
use bitcoin::XOnlyPublicKey;
use secp256k1_zkp::{
    schnorr::Signature as SchnorrSignature, Message, Parity, PublicKey, Scalar, Secp256k1,
    SecretKey, Signing, Verification,
};

const BIP340_MIDSTATE: [u8; 32] = [
    0x9c, 0xec, 0xba, 0x11, 0x23, 0x92, 0x53, 0x81, 0x11, 0x67, 0x91, 0x12, 0xd1, 0x62, 0x7e, 0x0f,
    0x97, 0xc8, 0x75, 0x50, 0x00, 0x3c, 0xc7, 0x65, 0x90, 0xf6, 0x11, 0x64, 0x33, 0xe9, 0xb6, 0x6a,
];

sha256t_hash_newtype!(
    Bip340Hash,
    Bip340HashTag,
    BIP340_MIDSTATE,
    64,
    doc = "bip340 hash",
    true
);

/// Compute a signature point for the given public key, nonce and message.
pub fn schnorrsig_compute_sig_point<C: Verification>(
    secp: &Secp256k1<C>,
    pubkey: &XOnlyPublicKey,
    nonce: &XOnlyPublicKey,
    message: &Message,
) -> Result<PublicKey, Error> {
    let hash = create_schnorr_hash(message, nonce, pubkey);
    let pk = schnorr_pubkey_to_pubkey(pubkey)?;
    let scalar = Scalar::from_be_bytes(hash).expect("a valid scalar from a hash value");
    let tweaked = pk.mul_tweak(secp, &scalar)?;
    let npk = schnorr_pubkey_to_pubkey(nonce)?;
    Ok(npk.combine(&tweaked)?)
}

/// Compute the sum of the signature points for the given public key and each
/// provided nonce and message pair.
pub fn schnorrsig_compute_sig_point_batch<C: Verification>(
    secp: &Secp256k1<C>,
    pubkey: &XOnlyPublicKey,
    nonces: &[XOnlyPublicKey],
    messages: &[Message],
) -> Result<PublicKey, Error> {
    if nonces.is_empty() || nonces.len() != messages.len() {
        return Err(Error::InvalidArgument(format!(
            "[schnorrsig_compute_sig_point_batch] error: {} nonces provided for {} messages",
            nonces.len(),
            messages.len()
        )));
    }

    let sig_points = nonces
        .iter()
        .zip(messages.iter())
        .map(|(nonce, message)| schnorrsig_compute_sig_point(secp, pubkey, nonce, message))
        .collect::<Result<Vec<PublicKey>, Error>>()?;
    Ok(PublicKey::combine_keys(
        &sig_points.iter().collect::<Vec<_>>(),
    )?)
}

/// Decompose a bip340 signature into a nonce and a secret key (as byte array)
pub fn schnorrsig_decompose(
    signature: &SchnorrSignature,
) -> Result<(XOnlyPublicKey, &[u8]), Error> {
    let bytes = signature.as_ref();
    Ok((XOnlyPublicKey::from_slice(&bytes[0..32])?, &bytes[32..64]))
}

/// Create a Schnorr signature using the provided nonce instead of generating
/// one, as an oracle having committed to the nonce beforehand would.
pub fn schnorrsig_sign_with_nonce<S: Signing>(
    secp: &Secp256k1<S>,
    msg: &Message,
    keypair: &KeyPair,
    nonce: &[u8; 32],
) -> SchnorrSignature {
    let nonce_keypair =
        KeyPair::from_seckey_slice(secp, nonce).expect("the nonce to be a valid secret key");
    let (nonce_pubkey, nonce_parity) = nonce_keypair.x_only_public_key();
    let mut k = SecretKey::from_keypair(&nonce_keypair);
    if nonce_parity == Parity::Odd {
        k = k.negate();
    }

    let (pubkey, pubkey_parity) = keypair.x_only_public_key();
    let mut sk = SecretKey::from_keypair(keypair);
    if pubkey_parity == Parity::Odd {
        sk = sk.negate();
    }

    let challenge = create_schnorr_hash(msg, &nonce_pubkey, &pubkey);
    let challenge_scalar =
        Scalar::from_be_bytes(challenge).expect("a valid scalar from a hash value");
    let s = sk
        .mul_tweak(&challenge_scalar)
        .expect("the challenge not to be the negation of the secret key")
        .add_tweak(&Scalar::from(k))
        .expect("the tweaked key to be valid");

    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(&nonce_pubkey.serialize());
    sig[32..].copy_from_slice(&s.secret_bytes());
    SchnorrSignature::from_slice(&sig).expect("a valid signature")
}

fn create_schnorr_hash(msg: &Message, nonce: &XOnlyPublicKey, pubkey: &XOnlyPublicKey) -> [u8; 32] {
    let mut buf = Vec::<u8>::new();
    buf.extend(&nonce.serialize());
    buf.extend(&pubkey.serialize());
    buf.extend(msg.as_ref().to_vec());
    Bip340Hash::hash(&buf).into_inner()
}

fn schnorr_pubkey_to_pubkey(schnorr_pubkey: &XOnlyPublicKey) -> Result<PublicKey, Error> {
    let mut buf = Vec::<u8>::with_capacity(33);
    buf.push(0x02);
    buf.extend(&schnorr_pubkey.serialize());
    Ok(PublicKey::from_slice(&buf)?)
}
