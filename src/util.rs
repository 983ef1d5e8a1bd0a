//! Utility functions not uniquely related to DLC

use bitcoin::blockdata::script::Builder;
use bitcoin::util::sighash::SighashCache;
use bitcoin::{EcdsaSighashType, Script, Sequence, Transaction, TxIn, TxOut, Witness};
use secp256k1_zkp::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey, Signing};

use crate::{Error, TxInputInfo, TX_INPUT_BASE_WEIGHT};

// Setting the nSequence for every input of a transaction to this value disables
// both RBF and nLockTime usage.
pub(crate) const DISABLE_LOCKTIME: Sequence = Sequence(0xffffffff);
// Setting the nSequence for every input of a transaction to this value disables
// RBF but enables nLockTime usage.
pub(crate) const ENABLE_LOCKTIME: Sequence = Sequence(0xfffffffe);

/// Get a BIP143 (https://github.com/bitcoin/bips/blob/master/bip-0143.mediawiki)
/// signature hash with sighash all flag for a segwit transaction input as
/// a Message instance
pub(crate) fn get_sig_hash_msg(
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    value: u64,
) -> Result<Message, Error> {
    let sig_hash = SighashCache::new(tx).segwit_signature_hash(
        input_index,
        script_pubkey,
        value,
        EcdsaSighashType::All,
    )?;
    Ok(Message::from_slice(&sig_hash).expect("a 32 byte sig hash"))
}

/// Convert a raw signature to DER encoded and append the sighash type, to use
/// a signature in a witness stack
pub(crate) fn finalize_sig(sig: &Signature, sig_hash_type: EcdsaSighashType) -> Vec<u8> {
    [
        sig.serialize_der().as_ref(),
        &[sig_hash_type.to_u32() as u8],
    ]
    .concat()
}

/// Generate a signature for a given transaction input using the given secret key.
pub fn get_raw_sig_for_tx_input<C: Signing>(
    secp: &Secp256k1<C>,
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    value: u64,
    sk: &SecretKey,
) -> Result<Signature, Error> {
    let sig_hash_msg = get_sig_hash_msg(tx, input_index, script_pubkey, value)?;
    Ok(secp.sign_ecdsa_low_r(&sig_hash_msg, sk))
}

/// Generate a signature for the given P2WPKH transaction input, using the
/// script pubkey associated with the given secret key as script code.
pub fn get_raw_sig_for_p2wpkh_input<C: Signing>(
    secp: &Secp256k1<C>,
    sk: &SecretKey,
    tx: &Transaction,
    input_index: usize,
    value: u64,
) -> Result<Signature, Error> {
    let script_pubkey = get_pkh_script_pubkey(&PublicKey::from_secret_key(secp, sk));
    get_raw_sig_for_tx_input(secp, tx, input_index, &script_pubkey, value, sk)
}

/// Returns the legacy pay to public key hash script pubkey for the given
/// public key, used as script code when signing segwit v0 P2WPKH inputs.
pub(crate) fn get_pkh_script_pubkey(pk: &PublicKey) -> Script {
    let pk = bitcoin::PublicKey {
        compressed: true,
        inner: *pk,
    };
    Script::new_p2pkh(&pk.pubkey_hash())
}

/// Create a signature for a p2wpkh transaction input using the provided secret key
/// and places the signature and associated public key on the witness stack.
pub fn sign_p2wpkh_input<C: Signing>(
    secp: &Secp256k1<C>,
    sk: &SecretKey,
    tx: &mut Transaction,
    input_index: usize,
    value: u64,
) -> Result<(), Error> {
    tx.input[input_index].witness =
        get_witness_for_p2wpkh_input(secp, sk, tx, input_index, value)?;
    Ok(())
}

/// Generates the witness data for a P2WPKH input using the provided secret key.
pub fn get_witness_for_p2wpkh_input<C: Signing>(
    secp: &Secp256k1<C>,
    sk: &SecretKey,
    tx: &Transaction,
    input_index: usize,
    value: u64,
) -> Result<Witness, Error> {
    let sig = get_raw_sig_for_p2wpkh_input(secp, sk, tx, input_index, value)?;
    Ok(Witness::from_vec(vec![
        finalize_sig(&sig, EcdsaSighashType::All),
        PublicKey::from_secret_key(secp, sk).serialize().to_vec(),
    ]))
}

/// Extract the public keys from a multisig redeem script, in script order.
pub(crate) fn get_pubkeys_from_multisig_script(script: &Script) -> Result<Vec<PublicKey>, Error> {
    use bitcoin::blockdata::script::Instruction;
    let mut pubkeys = Vec::new();
    for instruction in script.instructions() {
        let instruction = instruction.map_err(|_| {
            Error::InvalidArgument("invalid multisig script".to_string())
        })?;
        if let Instruction::PushBytes(bytes) = instruction {
            pubkeys.push(PublicKey::from_slice(bytes)?);
        }
    }
    if pubkeys.len() != 2 {
        return Err(Error::InvalidArgument(format!(
            "expected a multisig script containing 2 public keys, found {}",
            pubkeys.len()
        )));
    }
    Ok(pubkeys)
}

/// Insert the given signatures in the witness stack of the given input,
/// followed by the redeem script and preceded by an empty element consumed
/// by the extra pop of `OP_CHECKMULTISIG`. Signatures must be given in the
/// order of the associated public keys within the redeem script.
pub(crate) fn finalize_multisig_input(
    transaction: &mut Transaction,
    input_index: usize,
    script_pubkey: &Script,
    signatures: &[Signature],
) {
    let mut witness = vec![Vec::new()];
    witness.extend(
        signatures
            .iter()
            .map(|s| finalize_sig(s, EcdsaSighashType::All)),
    );
    witness.push(script_pubkey.to_bytes());
    transaction.input[input_index].witness = Witness::from_vec(witness);
}

/// Transforms a redeem script for a p2sh-p2w* output to a script signature.
pub(crate) fn redeem_script_to_script_sig(redeem: &Script) -> Script {
    match redeem.len() {
        0 => Script::new(),
        _ => Builder::new().push_slice(redeem.as_bytes()).into_script(),
    }
}

/// Computes the weight contributed by the given inputs to the transaction
/// spending them, based on their declared maximum witness length.
pub(crate) fn get_inputs_weight(inputs: &[TxInputInfo]) -> Result<usize, Error> {
    let mut inputs_weight: usize = 0;
    for input in inputs {
        let script_weight = redeem_script_to_script_sig(&input.redeem_script)
            .len()
            .checked_mul(4)
            .ok_or_else(|| {
                Error::InvalidArgument("could not compute input script weight".to_string())
            })?;
        inputs_weight = checked_add!(
            inputs_weight,
            TX_INPUT_BASE_WEIGHT,
            script_weight,
            input.max_witness_len
        )?;
    }
    Ok(inputs_weight)
}

/// Computes the required fee for the given weight in weight units and fee rate in sats per vbyte.
pub fn weight_to_fee(weight: usize, fee_rate: u64) -> Result<u64, Error> {
    let vbytes = f64::ceil((weight as f64) / 4.0) as u64;
    vbytes.checked_mul(fee_rate).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "overflow applying fee rate {} to weight {}",
            fee_rate, weight
        ))
    })
}

/// Create unsigned transaction inputs for the given utxos, paired with the
/// serial ids that determine their position in the funding transaction.
pub(crate) fn get_unsigned_tx_inputs_and_serial_ids(
    inputs: &[TxInputInfo],
    sequence: Sequence,
) -> (Vec<TxIn>, Vec<u64>) {
    let mut tx_ins = Vec::with_capacity(inputs.len());
    let mut serial_ids = Vec::with_capacity(inputs.len());

    for input in inputs {
        tx_ins.push(TxIn {
            previous_output: input.outpoint,
            script_sig: redeem_script_to_script_sig(&input.redeem_script),
            sequence,
            witness: Witness::new(),
        });
        serial_ids.push(input.serial_id);
    }

    (tx_ins, serial_ids)
}

/// Sorts the given inputs in following the order of the ids.
pub(crate) fn order_by_serial_ids<T>(inputs: Vec<T>, ids: &[u64]) -> Vec<T> {
    debug_assert!(inputs.len() == ids.len());
    let mut combined: Vec<(&u64, T)> = ids.iter().zip(inputs).collect();
    combined.sort_by_key(|x| *x.0);
    combined.into_iter().map(|x| x.1).collect()
}

/// Get the vout and TxOut of the first output with a matching `script_pubkey`
/// if any.
pub fn get_output_for_script_pubkey<'a>(
    tx: &'a Transaction,
    script_pubkey: &Script,
) -> Option<(usize, &'a TxOut)> {
    tx.output
        .iter()
        .enumerate()
        .find(|(_, x)| &x.script_pubkey == script_pubkey)
}

/// Filters the outputs that have a value lower than the given `dust_limit`.
pub(crate) fn discard_dust(txs: Vec<TxOut>, dust_limit: u64) -> Vec<TxOut> {
    txs.into_iter().filter(|x| x.value >= dust_limit).collect()
}

pub(crate) fn get_sequence(lock_time: u32) -> Sequence {
    if lock_time == 0 {
        DISABLE_LOCKTIME
    } else {
        ENABLE_LOCKTIME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_to_fee_rounds_up() {
        assert_eq!(85, weight_to_fee(337, 1).unwrap());
        assert_eq!(84, weight_to_fee(336, 1).unwrap());
        assert_eq!(170, weight_to_fee(337, 2).unwrap());
    }

    #[test]
    fn order_by_serial_ids_is_stable() {
        let inputs = vec!["fund", "local", "remote"];
        let ordered = order_by_serial_ids(inputs.clone(), &[0, 0, 0]);
        assert_eq!(inputs, ordered);

        let ordered = order_by_serial_ids(inputs, &[2, 1, 1]);
        assert_eq!(vec!["local", "remote", "fund"], ordered);
    }

    #[test]
    fn discard_dust_keeps_outputs_at_limit() {
        let outputs = vec![
            TxOut {
                value: 1000,
                script_pubkey: Script::new(),
            },
            TxOut {
                value: 999,
                script_pubkey: Script::new(),
            },
        ];
        let filtered = discard_dust(outputs, 1000);
        assert_eq!(1, filtered.len());
        assert_eq!(1000, filtered[0].value);
    }

    #[test]
    fn redeem_script_to_script_sig_wraps_in_push() {
        assert_eq!(Script::new(), redeem_script_to_script_sig(&Script::new()));

        let redeem = Builder::new().push_int(1).into_script();
        let script_sig = redeem_script_to_script_sig(&redeem);
        assert_eq!(redeem.len() + 1, script_sig.len());
    }
}
