//! # DLC transactions
//! Library for creating, signing and verifying the transactions of the
//! Discreet Log Contract protocol: a funding transaction locking the
//! collateral of both parties to a 2 of 2 multisig output, a set of contract
//! execution transactions (one per possible outcome) distributing the
//! collateral based on the outcome attested by an oracle, and a refund
//! transaction returning the collateral to each party after a timeout in
//! case the oracle goes missing.

// Coding conventions
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(missing_docs)]

extern crate bitcoin;
extern crate core;
extern crate secp256k1_zkp;
#[cfg(feature = "serde")]
extern crate serde;

macro_rules! checked_add {
    ($a: expr, $b: expr) => {
        $a.checked_add($b).ok_or(Error::InvalidArgument(format!(
            "[checked_add] error: overflow when adding {} and {}",
            $a, $b
        )))
    };
    ($a: expr, $b: expr, $c: expr) => {
        checked_add!(checked_add!($a, $b)?, $c)
    };
    ($a: expr, $b: expr, $c: expr, $d: expr) => {
        checked_add!(checked_add!($a, $b, $c)?, $d)
    };
}

pub mod batch;
pub mod secp_utils;
pub mod util;

use bitcoin::secp256k1::Scalar;
use bitcoin::{
    blockdata::{
        opcodes,
        script::{Builder, Script},
        transaction::{OutPoint, Transaction, TxIn, TxOut},
    },
    EcdsaSighashType, PackedLockTime, Witness,
};
use secp256k1_zkp::schnorr::Signature as SchnorrSignature;
use secp256k1_zkp::{
    ecdsa::Signature, EcdsaAdaptorSignature, Message, PublicKey, Secp256k1, SecretKey, Signing,
    Verification, XOnlyPublicKey,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum value that can be included in a transaction output. Under this value,
/// outputs are discarded from contract execution transactions.
const DUST_LIMIT: u64 = 1000;

/// The transaction version used for all transactions of a contract.
const TX_VERSION: i32 = 2;

/// The weight of a fund transaction without inputs and change outputs,
/// distributed equally between the two parties.
const FUND_TX_BASE_WEIGHT: usize = 214;

/// The weight of a CET excluding payout outputs, distributed equally between
/// the two parties.
const CET_BASE_WEIGHT: usize = 498;

/// The base weight of a transaction input computed as: (outpoint(36) + sequence(4) + scriptPubKeySize(1)) * 4
const TX_INPUT_BASE_WEIGHT: usize = 164;

/// The witness size of a P2WPKH input
pub const P2WPKH_WITNESS_SIZE: usize = 107;

/// Represents the payouts of a unique contract outcome.
#[derive(Eq, PartialEq, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Payout {
    /// Payout for the local party.
    pub local: u64,
    /// Payout for the remote party.
    pub remote: u64,
}

/// Contains the necessary transactions for establishing a DLC
#[derive(Clone)]
pub struct DlcTransactions {
    /// The fund transaction locking both parties collaterals
    pub fund: Transaction,
    /// The contract execution transactions for closing the contract on a
    /// certain outcome
    pub cets: Vec<Transaction>,
    /// The refund transaction for returning the collateral for each party in
    /// case of an oracle misbehavior
    pub refund: Transaction,

    /// The script pubkey of the fund output in the fund transaction
    pub funding_script_pubkey: Script,
}

impl DlcTransactions {
    /// Get the fund output in the fund transaction
    pub fn get_fund_output(&self) -> &TxOut {
        let v0_witness_fund_script = self.funding_script_pubkey.to_v0_p2wsh();
        util::get_output_for_script_pubkey(&self.fund, &v0_witness_fund_script)
            .expect("to find the funding output")
            .1
    }

    /// Get the vout of the fund output in the fund transaction
    pub fn get_fund_output_index(&self) -> usize {
        let v0_witness_fund_script = self.funding_script_pubkey.to_v0_p2wsh();
        util::get_output_for_script_pubkey(&self.fund, &v0_witness_fund_script)
            .expect("to find the funding output")
            .0
    }
}

/// Contains info about a utxo used for funding a DLC contract
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct TxInputInfo {
    /// The outpoint for the utxo
    pub outpoint: OutPoint,
    /// The maximum witness length
    pub max_witness_len: usize,
    /// The redeem script
    pub redeem_script: Script,
    /// The serial id for the input that will be used for ordering inputs of
    /// the fund transaction
    pub serial_id: u64,
}

/// An error code.
#[derive(Debug)]
pub enum Error {
    /// Secp256k1 error
    Secp256k1(secp256k1_zkp::Error),
    /// An error while computing a signature hash
    Sighash(bitcoin::util::sighash::Error),
    /// An invalid argument was provided
    InvalidArgument(String),
    /// An invariant of the fee computation was broken, most likely
    /// indicating a bug
    InvalidState(String),
}

impl From<secp256k1_zkp::Error> for Error {
    fn from(error: secp256k1_zkp::Error) -> Error {
        Error::Secp256k1(error)
    }
}

impl From<secp256k1_zkp::UpstreamError> for Error {
    fn from(error: secp256k1_zkp::UpstreamError) -> Error {
        Error::Secp256k1(secp256k1_zkp::Error::Upstream(error))
    }
}

impl From<bitcoin::util::sighash::Error> for Error {
    fn from(error: bitcoin::util::sighash::Error) -> Error {
        Error::Sighash(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Secp256k1(_) => write!(f, "Secp256k1 error"),
            Error::Sighash(_) => write!(f, "Error while computing sighash"),
            Error::InvalidArgument(ref s) => write!(f, "Invalid argument: {}", s),
            Error::InvalidState(ref s) => write!(f, "Invalid state: {}", s),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Secp256k1(e) => Some(e),
            Error::Sighash(e) => Some(e),
            Error::InvalidArgument(_) => None,
            Error::InvalidState(_) => None,
        }
    }
}

/// Contains the parameters required for creating DLC transactions for a single
/// party.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct PartyParams {
    /// The public key for the fund multisig script
    pub fund_pubkey: PublicKey,
    /// An address to receive change
    pub change_script_pubkey: Script,
    /// Id used to order fund outputs
    pub change_serial_id: u64,
    /// An address to receive the outcome amount
    pub payout_script_pubkey: Script,
    /// Id used to order CET outputs
    pub payout_serial_id: u64,
    /// A list of inputs to fund the contract
    pub inputs: Vec<TxInputInfo>,
    /// The sum of the inputs values.
    pub input_amount: u64,
    /// The collateral put in the contract by the party
    pub collateral: u64,
}

/// The change output of a party for the fund transaction, together with the
/// fund and CET fees the party is required to pay.
#[derive(Clone, Debug)]
pub struct ChangeOutputAndFees {
    /// The change output, whose value already accounts for the required fees.
    pub change_output: TxOut,
    /// The fee to be paid by the party for the fund transaction.
    pub fund_fee: u64,
    /// The fee to be paid by the party for a CET or the refund transaction.
    pub cet_fee: u64,
}

impl PartyParams {
    /// Returns the change output for a single party as well as the fees that
    /// they are required to pay for the fund transaction and the cet or refund
    /// transaction. The change output value already accounts for the required
    /// fees. If the input amount (sum of all input values) is lower than the
    /// sum of the collateral plus the required fees plus the optional premium,
    /// an error is returned.
    pub(crate) fn get_change_output_and_fees(
        &self,
        fee_rate_per_vb: u64,
        option_premium: u64,
        premium_dest: Option<&Script>,
    ) -> Result<ChangeOutputAndFees, Error> {
        let inputs_weight = util::get_inputs_weight(&self.inputs)?;

        // Change size is scaled by 4 from vBytes to weight units
        let change_weight = self
            .change_script_pubkey
            .len()
            .checked_mul(4)
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "[get_change_output_and_fees] error: failed to calculate change weight"
                        .to_string(),
                )
            })?;

        // Base weight (nLocktime, nVersion, funding output ...) is distributed
        // among parties independently of inputs contributed
        let mut fund_weight = checked_add!(
            FUND_TX_BASE_WEIGHT / 2,
            inputs_weight,
            change_weight,
            36
        )?;

        if option_premium > 0 {
            let dest = premium_dest.ok_or_else(|| {
                Error::InvalidArgument("[get_change_output_and_fees] error: a destination script is required when the premium amount is greater than zero".to_string())
            })?;
            fund_weight = checked_add!(fund_weight, 36, dest.len() * 4)?;
        }

        let fund_fee = util::weight_to_fee(fund_weight, fee_rate_per_vb)?;

        // Size of the payout script pubkey scaled by 4 from vBytes to weight units
        let output_spk_weight = self
            .payout_script_pubkey
            .len()
            .checked_mul(4)
            .ok_or_else(|| {
                Error::InvalidArgument(
                "[get_change_output_and_fees] error: failed to calculate payout script pubkey weight"
                    .to_string(),
            )
            })?;
        let cet_weight = checked_add!(CET_BASE_WEIGHT / 2, output_spk_weight)?;
        let cet_or_refund_fee = util::weight_to_fee(cet_weight, fee_rate_per_vb)?;

        let required_input_funds = checked_add!(
            self.collateral,
            fund_fee,
            cet_or_refund_fee,
            option_premium
        )?;
        if self.input_amount < required_input_funds {
            return Err(Error::InvalidArgument(format!("[get_change_output_and_fees] error: input amount is lower than the sum of the collateral plus the required fees and premium => input_amount: {}, collateral: {}, fund fee: {}, cet_or_refund_fee: {}, option_premium: {}", self.input_amount, self.collateral, fund_fee, cet_or_refund_fee, option_premium)));
        }

        let change_output = TxOut {
            value: self.input_amount - required_input_funds,
            script_pubkey: self.change_script_pubkey.clone(),
        };

        Ok(ChangeOutputAndFees {
            change_output,
            fund_fee,
            cet_fee: cet_or_refund_fee,
        })
    }
}

/// Optional parameters for the creation of DLC transactions.
#[derive(Clone, Debug, Default)]
pub struct DlcTxOptions {
    /// The destination of the premium paid by the local party when the
    /// contract is for an option. Required when `option_premium` is greater
    /// than zero.
    pub premium_dest: Option<Script>,
    /// The premium paid by the local party at funding time, zero by default.
    pub option_premium: u64,
    /// The lock time of the fund transaction, zero by default.
    pub fund_lock_time: u32,
    /// The lock time of the CETs, zero by default.
    pub cet_lock_time: u32,
    /// The serial id used to order the fund output within the fund
    /// transaction outputs, zero by default.
    pub fund_output_serial_id: u64,
}

/// Create the transactions for a DLC contract based on the provided parameters
pub fn create_dlc_transactions(
    local_params: &PartyParams,
    remote_params: &PartyParams,
    payouts: &[Payout],
    refund_lock_time: u32,
    fee_rate_per_vb: u64,
    options: &DlcTxOptions,
) -> Result<DlcTransactions, Error> {
    let total_collateral = checked_add!(local_params.collateral, remote_params.collateral)?;

    let has_proper_outcomes = payouts
        .iter()
        .all(|o| o.local.checked_add(o.remote) == Some(total_collateral));
    if !has_proper_outcomes {
        return Err(Error::InvalidArgument(
            "[create_dlc_transactions] error: payouts don't sum up to the total collateral amount"
                .to_string(),
        ));
    }

    let local_fees = local_params.get_change_output_and_fees(
        fee_rate_per_vb,
        options.option_premium,
        options.premium_dest.as_ref(),
    )?;
    let remote_fees = remote_params.get_change_output_and_fees(fee_rate_per_vb, 0, None)?;

    let fund_output_value = checked_add!(local_params.input_amount, remote_params.input_amount)?
        - local_fees.change_output.value
        - remote_fees.change_output.value
        - local_fees.fund_fee
        - remote_fees.fund_fee
        - options.option_premium;

    let expected_fund_output_value =
        checked_add!(total_collateral, local_fees.cet_fee, remote_fees.cet_fee)?;
    if expected_fund_output_value != fund_output_value {
        return Err(Error::InvalidState(format!(
            "[create_dlc_transactions] error: fee computation doesn't match, expected a fund output value of {} but computed {}",
            expected_fund_output_value, fund_output_value
        )));
    }

    let fund_sequence = util::get_sequence(options.fund_lock_time);
    let (local_tx_ins, local_inputs_serial_ids) =
        util::get_unsigned_tx_inputs_and_serial_ids(&local_params.inputs, fund_sequence);
    let (remote_tx_ins, remote_inputs_serial_ids) =
        util::get_unsigned_tx_inputs_and_serial_ids(&remote_params.inputs, fund_sequence);

    let funding_script_pubkey =
        make_funding_redeemscript(&local_params.fund_pubkey, &remote_params.fund_pubkey);

    let premium_output = match options.option_premium {
        0 => None,
        premium => options.premium_dest.as_ref().map(|dest| TxOut {
            value: premium,
            script_pubkey: dest.clone(),
        }),
    };

    let fund_tx = create_fund_transaction(
        &funding_script_pubkey,
        fund_output_value,
        &local_tx_ins,
        &local_inputs_serial_ids,
        &remote_tx_ins,
        &remote_inputs_serial_ids,
        local_fees.change_output,
        local_params.change_serial_id,
        remote_fees.change_output,
        remote_params.change_serial_id,
        options.fund_output_serial_id,
        premium_output,
        options.fund_lock_time,
    );

    let fund_vout = get_fund_output_position(
        options.fund_output_serial_id,
        local_params.change_serial_id,
        remote_params.change_serial_id,
    );
    let fund_outpoint = OutPoint {
        txid: fund_tx.txid(),
        vout: fund_vout as u32,
    };

    let cet_input = TxIn {
        previous_output: fund_outpoint,
        script_sig: Script::default(),
        sequence: util::get_sequence(options.cet_lock_time),
        witness: Witness::default(),
    };

    let cets = create_cets(
        &cet_input,
        &local_params.payout_script_pubkey,
        local_params.payout_serial_id,
        &remote_params.payout_script_pubkey,
        remote_params.payout_serial_id,
        payouts,
        options.cet_lock_time,
    );

    let local_refund_output = TxOut {
        value: local_params.collateral,
        script_pubkey: local_params.payout_script_pubkey.clone(),
    };
    let remote_refund_output = TxOut {
        value: remote_params.collateral,
        script_pubkey: remote_params.payout_script_pubkey.clone(),
    };
    let refund_input = TxIn {
        previous_output: fund_outpoint,
        script_sig: Script::default(),
        sequence: util::ENABLE_LOCKTIME,
        witness: Witness::default(),
    };
    let refund_tx = create_refund_transaction(
        local_refund_output,
        remote_refund_output,
        refund_input,
        refund_lock_time,
    );

    Ok(DlcTransactions {
        fund: fund_tx,
        cets,
        refund: refund_tx,
        funding_script_pubkey,
    })
}

/// Returns the position of the fund output within the serial id ordered
/// outputs of the fund transaction.
fn get_fund_output_position(
    fund_output_serial_id: u64,
    local_change_serial_id: u64,
    remote_change_serial_id: u64,
) -> usize {
    let mut serial_ids = [
        fund_output_serial_id,
        local_change_serial_id,
        remote_change_serial_id,
    ];
    serial_ids.sort_unstable();
    serial_ids
        .iter()
        .position(|&id| id == fund_output_serial_id)
        .expect("the fund output serial id to be present")
}

/// Create a funding transaction with one output locking the given amount to
/// the P2WSH script of the given redeem script. Inputs and change outputs are
/// placed following the ascending order of their serial ids so that both
/// parties compute an identical transaction. The premium output, if any, is
/// appended after the ordered outputs and discarded if below the dust limit.
pub fn create_fund_transaction(
    funding_script_pubkey: &Script,
    output_amount: u64,
    local_inputs: &[TxIn],
    local_inputs_serial_ids: &[u64],
    remote_inputs: &[TxIn],
    remote_inputs_serial_ids: &[u64],
    local_change_output: TxOut,
    local_change_serial_id: u64,
    remote_change_output: TxOut,
    remote_change_serial_id: u64,
    fund_output_serial_id: u64,
    premium_output: Option<TxOut>,
    lock_time: u32,
) -> Transaction {
    let fund_tx_out = TxOut {
        value: output_amount,
        script_pubkey: funding_script_pubkey.to_v0_p2wsh(),
    };

    let serial_ids = [
        fund_output_serial_id,
        local_change_serial_id,
        remote_change_serial_id,
    ];
    let mut output = util::order_by_serial_ids(
        vec![fund_tx_out, local_change_output, remote_change_output],
        &serial_ids,
    );

    if let Some(premium_output) = premium_output {
        if premium_output.value >= DUST_LIMIT {
            output.push(premium_output);
        }
    }

    let input = util::order_by_serial_ids(
        [local_inputs, remote_inputs].concat(),
        &[local_inputs_serial_ids, remote_inputs_serial_ids].concat(),
    );

    Transaction {
        version: TX_VERSION,
        lock_time: PackedLockTime(lock_time),
        input,
        output,
    }
}

/// Create a contract execution transaction paying each party its payout for
/// the outcome. Outputs are placed following the ascending order of the
/// payout serial ids (local first on equality) and discarded when below the
/// dust limit.
pub fn create_cet(
    local_output: TxOut,
    local_payout_serial_id: u64,
    remote_output: TxOut,
    remote_payout_serial_id: u64,
    fund_tx_in: &TxIn,
    lock_time: u32,
) -> Transaction {
    let output = if local_payout_serial_id <= remote_payout_serial_id {
        vec![local_output, remote_output]
    } else {
        vec![remote_output, local_output]
    };

    let output = util::discard_dust(output, DUST_LIMIT);

    Transaction {
        version: TX_VERSION,
        lock_time: PackedLockTime(lock_time),
        input: vec![fund_tx_in.clone()],
        output,
    }
}

/// Create a set of contract execution transactions, one for each provided
/// payout, all spending the given fund transaction input.
pub fn create_cets(
    fund_tx_input: &TxIn,
    local_payout_script_pubkey: &Script,
    local_payout_serial_id: u64,
    remote_payout_script_pubkey: &Script,
    remote_payout_serial_id: u64,
    payouts: &[Payout],
    lock_time: u32,
) -> Vec<Transaction> {
    payouts
        .iter()
        .map(|payout| {
            let local_output = TxOut {
                value: payout.local,
                script_pubkey: local_payout_script_pubkey.clone(),
            };
            let remote_output = TxOut {
                value: payout.remote,
                script_pubkey: remote_payout_script_pubkey.clone(),
            };
            create_cet(
                local_output,
                local_payout_serial_id,
                remote_output,
                remote_payout_serial_id,
                fund_tx_input,
                lock_time,
            )
        })
        .collect()
}

/// Create a refund transaction returning its collateral to each party once
/// the given lock time is reached. Outputs are in fixed order, local party
/// first.
pub fn create_refund_transaction(
    local_output: TxOut,
    remote_output: TxOut,
    funding_input: TxIn,
    lock_time: u32,
) -> Transaction {
    Transaction {
        version: TX_VERSION,
        lock_time: PackedLockTime(lock_time),
        input: vec![funding_input],
        output: vec![local_output, remote_output],
    }
}

/// Create the multisig redeem script for the funding output, ordering the
/// public keys by their serialization so that both parties derive the same
/// script.
pub fn make_funding_redeemscript(a: &PublicKey, b: &PublicKey) -> Script {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    Builder::new()
        .push_opcode(opcodes::all::OP_PUSHNUM_2)
        .push_slice(&first.serialize())
        .push_slice(&second.serialize())
        .push_opcode(opcodes::all::OP_PUSHNUM_2)
        .push_opcode(opcodes::all::OP_CHECKMULTISIG)
        .into_script()
}

/// Compute the adaptor point for the given messages, oracle nonces and
/// oracle public key: the sum over the nonces of `R_i + H(R_i, P, m_i) * P`,
/// whose discrete logarithm is the sum of the `s` values of the oracle
/// signatures over the messages.
pub fn compute_adaptor_point<C: Verification>(
    secp: &Secp256k1<C>,
    oracle_pubkey: &XOnlyPublicKey,
    oracle_r_values: &[XOnlyPublicKey],
    msgs: &[Message],
) -> Result<PublicKey, Error> {
    if oracle_r_values.len() != msgs.len() {
        return Err(Error::InvalidArgument(format!(
            "[compute_adaptor_point] error: {} oracle nonces were provided for {} messages",
            oracle_r_values.len(),
            msgs.len()
        )));
    }

    if msgs.len() == 1 {
        return secp_utils::schnorrsig_compute_sig_point(
            secp,
            oracle_pubkey,
            &oracle_r_values[0],
            &msgs[0],
        );
    }

    secp_utils::schnorrsig_compute_sig_point_batch(secp, oracle_pubkey, oracle_r_values, msgs)
}

/// Create an adaptor signature for the given cet using the provided adaptor point.
pub fn create_cet_adaptor_sig_from_point<C: Signing>(
    secp: &Secp256k1<C>,
    cet: &Transaction,
    adaptor_point: &PublicKey,
    funding_sk: &SecretKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
) -> Result<EcdsaAdaptorSignature, Error> {
    let sig_hash = util::get_sig_hash_msg(cet, 0, funding_script_pubkey, fund_output_value)?;

    #[cfg(feature = "std")]
    let res = EcdsaAdaptorSignature::encrypt(secp, &sig_hash, funding_sk, adaptor_point);

    #[cfg(not(feature = "std"))]
    let res =
        EcdsaAdaptorSignature::encrypt_no_aux_rand(secp, &sig_hash, funding_sk, adaptor_point);

    Ok(res)
}

/// Create an adaptor signature for the given cet using the provided oracle
/// public key and nonces. The number of nonces must match the number of
/// messages.
pub fn create_cet_adaptor_sig<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    cet: &Transaction,
    oracle_pubkey: &XOnlyPublicKey,
    oracle_r_values: &[XOnlyPublicKey],
    funding_sk: &SecretKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    msgs: &[Message],
) -> Result<EcdsaAdaptorSignature, Error> {
    let adaptor_point = compute_adaptor_point(secp, oracle_pubkey, oracle_r_values, msgs)?;
    create_cet_adaptor_sig_from_point(
        secp,
        cet,
        &adaptor_point,
        funding_sk,
        funding_script_pubkey,
        fund_output_value,
    )
}

/// Create an adaptor signature for each of the given cet and message set
/// pairs. For each cet the number of messages must be lower or equal to the
/// number of oracle nonces, and only the first nonces are used.
pub fn create_cet_adaptor_sigs<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    cets: &[Transaction],
    oracle_pubkey: &XOnlyPublicKey,
    oracle_r_values: &[XOnlyPublicKey],
    funding_sk: &SecretKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    msgs: &[Vec<Message>],
) -> Result<Vec<EcdsaAdaptorSignature>, Error> {
    if cets.len() != msgs.len() {
        return Err(Error::InvalidArgument(format!(
            "[create_cet_adaptor_sigs] error: number of cets ({}) must match number of message sets ({})",
            cets.len(),
            msgs.len()
        )));
    }

    cets.iter()
        .zip(msgs.iter())
        .map(|(cet, msgs)| {
            let r_values = first_oracle_r_values(oracle_r_values, msgs.len())?;
            create_cet_adaptor_sig(
                secp,
                cet,
                oracle_pubkey,
                r_values,
                funding_sk,
                funding_script_pubkey,
                fund_output_value,
                msgs,
            )
        })
        .collect()
}

/// Verify that a given adaptor signature for a given cet is valid with respect
/// to an adaptor point.
pub fn verify_cet_adaptor_sig_from_point<C: Verification>(
    secp: &Secp256k1<C>,
    adaptor_sig: &EcdsaAdaptorSignature,
    cet: &Transaction,
    adaptor_point: &PublicKey,
    pubkey: &PublicKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
) -> Result<(), Error> {
    let sig_hash = util::get_sig_hash_msg(cet, 0, funding_script_pubkey, fund_output_value)?;
    adaptor_sig.verify(secp, &sig_hash, pubkey, adaptor_point)?;
    Ok(())
}

/// Verify that a given adaptor signature for a given cet is valid with respect
/// to an oracle public key, nonces and messages.
pub fn verify_cet_adaptor_sig<C: Verification>(
    secp: &Secp256k1<C>,
    adaptor_sig: &EcdsaAdaptorSignature,
    cet: &Transaction,
    oracle_pubkey: &XOnlyPublicKey,
    oracle_r_values: &[XOnlyPublicKey],
    pubkey: &PublicKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    msgs: &[Message],
) -> Result<(), Error> {
    let adaptor_point = compute_adaptor_point(secp, oracle_pubkey, oracle_r_values, msgs)?;
    verify_cet_adaptor_sig_from_point(
        secp,
        adaptor_sig,
        cet,
        &adaptor_point,
        pubkey,
        funding_script_pubkey,
        fund_output_value,
    )
}

/// Verify the given adaptor signatures for the given cet and message set
/// pairs, using the same nonce selection as [`create_cet_adaptor_sigs`].
pub fn verify_cet_adaptor_sigs<C: Verification>(
    secp: &Secp256k1<C>,
    adaptor_sigs: &[EcdsaAdaptorSignature],
    cets: &[Transaction],
    oracle_pubkey: &XOnlyPublicKey,
    oracle_r_values: &[XOnlyPublicKey],
    pubkey: &PublicKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
    msgs: &[Vec<Message>],
) -> Result<(), Error> {
    if cets.len() != adaptor_sigs.len() || cets.len() != msgs.len() {
        return Err(Error::InvalidArgument(format!(
            "[verify_cet_adaptor_sigs] error: number of cets ({}), signatures ({}) and message sets ({}) differ",
            cets.len(),
            adaptor_sigs.len(),
            msgs.len()
        )));
    }

    for ((adaptor_sig, cet), msgs) in adaptor_sigs.iter().zip(cets.iter()).zip(msgs.iter()) {
        let r_values = first_oracle_r_values(oracle_r_values, msgs.len())?;
        verify_cet_adaptor_sig(
            secp,
            adaptor_sig,
            cet,
            oracle_pubkey,
            r_values,
            pubkey,
            funding_script_pubkey,
            fund_output_value,
            msgs,
        )?;
    }

    Ok(())
}

fn first_oracle_r_values(
    oracle_r_values: &[XOnlyPublicKey],
    nb_messages: usize,
) -> Result<&[XOnlyPublicKey], Error> {
    if oracle_r_values.len() < nb_messages {
        return Err(Error::InvalidArgument(format!(
            "[first_oracle_r_values] error: {} oracle nonces provided for {} messages, the number of nonces must be greater or equal to the number of messages",
            oracle_r_values.len(),
            nb_messages
        )));
    }
    Ok(&oracle_r_values[..nb_messages])
}

/// Compute the adaptor secret associated with the given oracle signatures,
/// the sum of their `s` values over the secp256k1 group order.
fn signatures_to_secret(signatures: &[SchnorrSignature]) -> Result<SecretKey, Error> {
    let s_values = signatures
        .iter()
        .map(|x| secp_utils::schnorrsig_decompose(x).map(|(_, s)| s))
        .collect::<Result<Vec<&[u8]>, Error>>()?;
    let first = s_values.first().ok_or_else(|| {
        Error::InvalidArgument("[signatures_to_secret] error: no oracle signature provided".to_string())
    })?;
    let secret = SecretKey::from_slice(first)?;

    s_values.iter().skip(1).try_fold(secret, |accum, s| {
        let sec = SecretKey::from_slice(s)?;
        accum
            .add_tweak(&Scalar::from(sec))
            .map_err(|e| Error::Secp256k1(secp256k1_zkp::Error::Upstream(e)))
    })
}

/// Sign the given cet using own private key, adapt the counter party
/// signature using the oracle signatures over the outcome, and place both
/// signatures and the funding multisig script on the witness stack, ordered
/// as within the script.
pub fn sign_cet<C: Signing>(
    secp: &Secp256k1<C>,
    cet: &mut Transaction,
    adaptor_signature: &EcdsaAdaptorSignature,
    oracle_signatures: &[SchnorrSignature],
    funding_sk: &SecretKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
) -> Result<(), Error> {
    let adaptor_secret = signatures_to_secret(oracle_signatures)?;
    let adapted_sig = adaptor_signature.decrypt(&adaptor_secret)?;

    let own_sig = util::get_raw_sig_for_tx_input(
        secp,
        cet,
        0,
        funding_script_pubkey,
        fund_output_value,
        funding_sk,
    )?;
    let own_pk = PublicKey::from_secret_key(secp, funding_sk);

    let pubkeys = util::get_pubkeys_from_multisig_script(funding_script_pubkey)?;
    let signatures = if own_pk == pubkeys[0] {
        [own_sig, adapted_sig]
    } else if own_pk == pubkeys[1] {
        [adapted_sig, own_sig]
    } else {
        return Err(Error::InvalidArgument(
            "[sign_cet] error: public key not part of the funding multisig script".to_string(),
        ));
    };

    util::finalize_multisig_input(cet, 0, funding_script_pubkey, &signatures);

    Ok(())
}

/// Generate a raw signature for the refund transaction input using the given
/// funding secret key.
pub fn get_raw_refund_tx_signature<C: Signing>(
    secp: &Secp256k1<C>,
    refund_tx: &Transaction,
    funding_sk: &SecretKey,
    funding_script_pubkey: &Script,
    fund_output_value: u64,
) -> Result<Signature, Error> {
    util::get_raw_sig_for_tx_input(
        secp,
        refund_tx,
        0,
        funding_script_pubkey,
        fund_output_value,
        funding_sk,
    )
}

/// Place the given signatures on the witness stack of the refund transaction
/// input together with the funding multisig script, ordered as within the
/// script.
pub fn add_signatures_to_refund_tx(
    refund_tx: &mut Transaction,
    local_fund_pubkey: &PublicKey,
    remote_fund_pubkey: &PublicKey,
    local_signature: Signature,
    remote_signature: Signature,
) -> Result<(), Error> {
    let funding_script_pubkey = make_funding_redeemscript(local_fund_pubkey, remote_fund_pubkey);
    let signatures = if local_fund_pubkey <= remote_fund_pubkey {
        [local_signature, remote_signature]
    } else {
        [remote_signature, local_signature]
    };

    util::finalize_multisig_input(refund_tx, 0, &funding_script_pubkey, &signatures);

    Ok(())
}

/// Verify a signature for the refund transaction input against the funding
/// public key of the local party, or the remote one if `verify_remote` is
/// set.
pub fn verify_refund_tx_signature<C: Verification>(
    secp: &Secp256k1<C>,
    refund_tx: &Transaction,
    signature: &Signature,
    local_fund_pubkey: &PublicKey,
    remote_fund_pubkey: &PublicKey,
    fund_output_value: u64,
    verify_remote: bool,
) -> Result<(), Error> {
    let funding_script_pubkey = make_funding_redeemscript(local_fund_pubkey, remote_fund_pubkey);
    let pubkey = if verify_remote {
        remote_fund_pubkey
    } else {
        local_fund_pubkey
    };
    verify_tx_input_sig(
        secp,
        signature,
        refund_tx,
        0,
        &funding_script_pubkey,
        fund_output_value,
        pubkey,
    )
}

/// Sign the fund transaction input spending the given utxo with the given
/// private key, placing a P2WPKH witness on the input.
pub fn sign_fund_transaction_input<C: Signing>(
    secp: &Secp256k1<C>,
    fund_transaction: &mut Transaction,
    privkey: &SecretKey,
    prev_outpoint: &OutPoint,
    value: u64,
) -> Result<(), Error> {
    let input_index = get_input_index(fund_transaction, prev_outpoint)?;
    util::sign_p2wpkh_input(secp, privkey, fund_transaction, input_index, value)
}

/// Generate a raw signature for the fund transaction input spending the given
/// utxo.
pub fn get_raw_funding_transaction_input_signature<C: Signing>(
    secp: &Secp256k1<C>,
    fund_transaction: &Transaction,
    privkey: &SecretKey,
    prev_outpoint: &OutPoint,
    value: u64,
) -> Result<Signature, Error> {
    let input_index = get_input_index(fund_transaction, prev_outpoint)?;
    util::get_raw_sig_for_p2wpkh_input(secp, privkey, fund_transaction, input_index, value)
}

/// Place the given signature and public key on the witness stack of the fund
/// transaction input spending the given utxo.
pub fn add_signature_to_fund_transaction(
    fund_transaction: &mut Transaction,
    signature: Signature,
    pubkey: &PublicKey,
    prev_outpoint: &OutPoint,
) -> Result<(), Error> {
    let input_index = get_input_index(fund_transaction, prev_outpoint)?;
    fund_transaction.input[input_index].witness = Witness::from_vec(vec![
        util::finalize_sig(&signature, EcdsaSighashType::All),
        pubkey.serialize().to_vec(),
    ]);
    Ok(())
}

/// Verify a signature for the fund transaction input spending the given
/// utxo, assumed to be a P2WPKH output for the given public key.
pub fn verify_fund_tx_signature<C: Verification>(
    secp: &Secp256k1<C>,
    fund_transaction: &Transaction,
    signature: &Signature,
    pubkey: &PublicKey,
    prev_outpoint: &OutPoint,
    value: u64,
) -> Result<(), Error> {
    let input_index = get_input_index(fund_transaction, prev_outpoint)?;
    let script_pubkey = util::get_pkh_script_pubkey(pubkey);
    verify_tx_input_sig(
        secp,
        signature,
        fund_transaction,
        input_index,
        &script_pubkey,
        value,
        pubkey,
    )
}

/// Verify a signature for a given transaction input.
pub fn verify_tx_input_sig<C: Verification>(
    secp: &Secp256k1<C>,
    signature: &Signature,
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &Script,
    value: u64,
    pk: &PublicKey,
) -> Result<(), Error> {
    let sig_hash_msg = util::get_sig_hash_msg(tx, input_index, script_pubkey, value)?;
    secp.verify_ecdsa(&sig_hash_msg, signature, pk)?;
    Ok(())
}

fn get_input_index(tx: &Transaction, outpoint: &OutPoint) -> Result<usize, Error> {
    tx.input
        .iter()
        .position(|i| &i.previous_output == outpoint)
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "[get_input_index] error: no input spending {} in the transaction",
                outpoint
            ))
        })
}
