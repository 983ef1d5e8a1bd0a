//! Module containing functions to fund a batch of DLC contracts with a
//! single funding transaction, sharing one set of inputs and one change
//! output per party across the contracts.

use bitcoin::{OutPoint, PackedLockTime, Script, Transaction, TxIn, TxOut, Witness};
use secp256k1_zkp::PublicKey;

use crate::{
    create_cets, create_refund_transaction, make_funding_redeemscript, util, ChangeOutputAndFees,
    Error, Payout, TxInputInfo, CET_BASE_WEIGHT, TX_VERSION,
};

/// The weight of the batch fund transaction without inputs, funding outputs
/// and change outputs, distributed equally between the two parties.
const BATCH_FUND_TX_BASE_WEIGHT: usize = 42;

/// The size in virtual bytes of a funding output: value, script length
/// prefix and P2WSH script pubkey.
const FUNDING_OUTPUT_SIZE: usize = 43;

/// Contains the parameters of a single party required for creating the
/// transactions of a batch of DLC contracts. The `fund_pubkeys`,
/// `payout_script_pubkeys`, `payout_serial_ids` and `collaterals` vectors
/// contain one entry per contract.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct BatchPartyParams {
    /// The public keys for the fund multisig script of each contract.
    pub fund_pubkeys: Vec<PublicKey>,
    /// An address to receive change
    pub change_script_pubkey: Script,
    /// Id used to order fund outputs
    pub change_serial_id: u64,
    /// Addresses to receive the outcome amount of each contract.
    pub payout_script_pubkeys: Vec<Script>,
    /// Ids used to order the CET outputs of each contract.
    pub payout_serial_ids: Vec<u64>,
    /// A list of inputs to fund the contracts.
    pub inputs: Vec<TxInputInfo>,
    /// The sum of the inputs values.
    pub input_amount: u64,
    /// The collateral put in each contract by the party.
    pub collaterals: Vec<u64>,
}

impl BatchPartyParams {
    fn validate(&self) -> Result<(), Error> {
        let nb_contracts = self.fund_pubkeys.len();
        if self.payout_script_pubkeys.len() != nb_contracts
            || self.payout_serial_ids.len() != nb_contracts
            || self.collaterals.len() != nb_contracts
        {
            return Err(Error::InvalidArgument(format!(
                "[validate] error: fund pubkeys ({}), payout script pubkeys ({}), payout serial ids ({}) and collaterals ({}) must have the same length",
                nb_contracts,
                self.payout_script_pubkeys.len(),
                self.payout_serial_ids.len(),
                self.collaterals.len()
            )));
        }
        Ok(())
    }

    /// Returns the change output for a single party as well as the fees that
    /// they are required to pay for the fund transaction and for the CETs or
    /// refund transactions of the whole batch. The CET fee is the total over
    /// the batch, to be apportioned between the contracts.
    pub(crate) fn get_change_output_and_fees(
        &self,
        fee_rate_per_vb: u64,
    ) -> Result<ChangeOutputAndFees, Error> {
        let inputs_weight = util::get_inputs_weight(&self.inputs)?;

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

        let base_weight = checked_add!(
            BATCH_FUND_TX_BASE_WEIGHT,
            FUNDING_OUTPUT_SIZE * self.fund_pubkeys.len() * 4
        )?;
        let fund_weight = checked_add!(base_weight / 2, inputs_weight, change_weight, 36)?;
        let fund_fee = util::weight_to_fee(fund_weight, fee_rate_per_vb)?;

        let mut cet_weight: usize = 0;
        for payout_script_pubkey in &self.payout_script_pubkeys {
            cet_weight = checked_add!(
                cet_weight,
                CET_BASE_WEIGHT / 2,
                payout_script_pubkey.len() * 4
            )?;
        }
        let cet_fee = util::weight_to_fee(cet_weight, fee_rate_per_vb)?;

        let total_collateral = sum_amounts(&self.collaterals)?;
        let required_input_funds = checked_add!(total_collateral, fund_fee, cet_fee)?;
        if self.input_amount < required_input_funds {
            return Err(Error::InvalidArgument(format!("[get_change_output_and_fees] error: input amount is lower than the sum of the collaterals plus the required fees => input_amount: {}, total collateral: {}, fund fee: {}, cet fee: {}", self.input_amount, total_collateral, fund_fee, cet_fee)));
        }

        let change_output = TxOut {
            value: self.input_amount - required_input_funds,
            script_pubkey: self.change_script_pubkey.clone(),
        };

        Ok(ChangeOutputAndFees {
            change_output,
            fund_fee,
            cet_fee,
        })
    }
}

/// Contains the transactions of a batch of DLC contracts sharing a single
/// fund transaction.
#[derive(Clone)]
pub struct BatchDlcTransactions {
    /// The fund transaction locking the collateral of every contract.
    pub fund: Transaction,
    /// The contract execution transactions of each contract.
    pub cets_list: Vec<Vec<Transaction>>,
    /// The refund transaction of each contract.
    pub refunds: Vec<Transaction>,
    /// The script pubkey of the fund output of each contract.
    pub funding_script_pubkeys: Vec<Script>,
}

/// Create the transactions for a batch of DLC contracts based on the provided
/// parameters.
pub fn create_batch_dlc_transactions(
    local_params: &BatchPartyParams,
    remote_params: &BatchPartyParams,
    payouts_list: &[Vec<Payout>],
    refund_lock_times: &[u32],
    fee_rate_per_vb: u64,
    fund_lock_time: u32,
    cet_lock_time: u32,
    fund_output_serial_ids: &[u64],
) -> Result<BatchDlcTransactions, Error> {
    local_params.validate()?;
    remote_params.validate()?;

    let nb_contracts = local_params.fund_pubkeys.len();
    if nb_contracts == 0 {
        return Err(Error::InvalidArgument(
            "[create_batch_dlc_transactions] error: at least one contract is required".to_string(),
        ));
    }
    if remote_params.fund_pubkeys.len() != nb_contracts
        || payouts_list.len() != nb_contracts
        || refund_lock_times.len() != nb_contracts
    {
        return Err(Error::InvalidArgument(format!(
            "[create_batch_dlc_transactions] error: number of payout sets ({}), local params ({}), remote params ({}) and refund lock times ({}) must be equal",
            payouts_list.len(),
            nb_contracts,
            remote_params.fund_pubkeys.len(),
            refund_lock_times.len()
        )));
    }

    for (i, payouts) in payouts_list.iter().enumerate() {
        let total_collateral =
            checked_add!(local_params.collaterals[i], remote_params.collaterals[i])?;
        let has_proper_outcomes = payouts
            .iter()
            .all(|o| o.local.checked_add(o.remote) == Some(total_collateral));
        if !has_proper_outcomes {
            return Err(Error::InvalidArgument(
                "[create_batch_dlc_transactions] error: payouts don't sum up to the total collateral amount"
                    .to_string(),
            ));
        }
    }

    let local_fees = local_params.get_change_output_and_fees(fee_rate_per_vb)?;
    let remote_fees = remote_params.get_change_output_and_fees(fee_rate_per_vb)?;

    // The total CET fee collected from each party is apportioned between the
    // contracts, the remainder of the division going to the miner of the
    // fund transaction.
    let local_cet_fee = local_fees.cet_fee / nb_contracts as u64;
    let remote_cet_fee = remote_fees.cet_fee / nb_contracts as u64;

    let mut fund_output_values = Vec::with_capacity(nb_contracts);
    for i in 0..nb_contracts {
        fund_output_values.push(checked_add!(
            local_params.collaterals[i],
            remote_params.collaterals[i],
            local_cet_fee,
            remote_cet_fee
        )?);
    }

    let total_fund_output_value = sum_amounts(&fund_output_values)?;
    let total_collateral = checked_add!(
        sum_amounts(&local_params.collaterals)?,
        sum_amounts(&remote_params.collaterals)?
    )?;
    let collateral_and_fees =
        checked_add!(total_collateral, local_fees.cet_fee, remote_fees.cet_fee)?;

    let collateral_diff = if collateral_and_fees > total_fund_output_value {
        collateral_and_fees - total_fund_output_value
    } else {
        total_fund_output_value - collateral_and_fees
    };
    if collateral_diff > 20 {
        return Err(Error::InvalidState(format!(
            "[create_batch_dlc_transactions] error: fee computation doesn't match, total fund output value {} and collateral and fees {} must be within 20 satoshis of each other",
            total_fund_output_value, collateral_and_fees
        )));
    }

    let funding_script_pubkeys: Vec<Script> = local_params
        .fund_pubkeys
        .iter()
        .zip(remote_params.fund_pubkeys.iter())
        .map(|(local, remote)| make_funding_redeemscript(local, remote))
        .collect();

    let fund_sequence = util::get_sequence(fund_lock_time);
    let (local_tx_ins, local_inputs_serial_ids) =
        util::get_unsigned_tx_inputs_and_serial_ids(&local_params.inputs, fund_sequence);
    let (remote_tx_ins, remote_inputs_serial_ids) =
        util::get_unsigned_tx_inputs_and_serial_ids(&remote_params.inputs, fund_sequence);

    let fund_tx = create_batch_fund_transaction(
        &funding_script_pubkeys,
        &fund_output_values,
        &local_tx_ins,
        &local_inputs_serial_ids,
        &remote_tx_ins,
        &remote_inputs_serial_ids,
        local_fees.change_output,
        local_params.change_serial_id,
        remote_fees.change_output,
        remote_params.change_serial_id,
        fund_output_serial_ids,
        fund_lock_time,
    )?;

    let fund_txid = fund_tx.txid();
    let fund_vouts = get_fund_output_positions(
        fund_output_serial_ids,
        local_params.change_serial_id,
        remote_params.change_serial_id,
        nb_contracts,
    );

    let mut cets_list = Vec::with_capacity(nb_contracts);
    let mut refunds = Vec::with_capacity(nb_contracts);

    for i in 0..nb_contracts {
        let fund_outpoint = OutPoint {
            txid: fund_txid,
            vout: fund_vouts[i] as u32,
        };

        let cet_input = TxIn {
            previous_output: fund_outpoint,
            script_sig: Script::default(),
            sequence: util::get_sequence(cet_lock_time),
            witness: Witness::default(),
        };
        cets_list.push(create_cets(
            &cet_input,
            &local_params.payout_script_pubkeys[i],
            local_params.payout_serial_ids[i],
            &remote_params.payout_script_pubkeys[i],
            remote_params.payout_serial_ids[i],
            &payouts_list[i],
            cet_lock_time,
        ));

        let local_refund_output = TxOut {
            value: local_params.collaterals[i],
            script_pubkey: local_params.payout_script_pubkeys[i].clone(),
        };
        let remote_refund_output = TxOut {
            value: remote_params.collaterals[i],
            script_pubkey: remote_params.payout_script_pubkeys[i].clone(),
        };
        let refund_input = TxIn {
            previous_output: fund_outpoint,
            script_sig: Script::default(),
            sequence: util::ENABLE_LOCKTIME,
            witness: Witness::default(),
        };
        refunds.push(create_refund_transaction(
            local_refund_output,
            remote_refund_output,
            refund_input,
            refund_lock_times[i],
        ));
    }

    Ok(BatchDlcTransactions {
        fund: fund_tx,
        cets_list,
        refunds,
        funding_script_pubkeys,
    })
}

/// Create a funding transaction with one output per provided funding redeem
/// script, locking the corresponding amount to its P2WSH script. Funding and
/// change outputs are placed following the ascending order of their serial
/// ids. If `fund_output_serial_ids` is empty every funding output gets serial
/// id zero, placing them at positions `0..N` before the change outputs.
pub fn create_batch_fund_transaction(
    funding_script_pubkeys: &[Script],
    output_amounts: &[u64],
    local_inputs: &[TxIn],
    local_inputs_serial_ids: &[u64],
    remote_inputs: &[TxIn],
    remote_inputs_serial_ids: &[u64],
    local_change_output: TxOut,
    local_change_serial_id: u64,
    remote_change_output: TxOut,
    remote_change_serial_id: u64,
    fund_output_serial_ids: &[u64],
    lock_time: u32,
) -> Result<Transaction, Error> {
    let nb_contracts = funding_script_pubkeys.len();
    if output_amounts.len() != nb_contracts {
        return Err(Error::InvalidArgument(format!(
            "[create_batch_fund_transaction] error: number of funding scripts ({}) and output amounts ({}) must be equal",
            nb_contracts,
            output_amounts.len()
        )));
    }
    if !fund_output_serial_ids.is_empty() && fund_output_serial_ids.len() != nb_contracts {
        return Err(Error::InvalidArgument(format!(
            "[create_batch_fund_transaction] error: {} fund output serial ids provided for {} funding outputs",
            fund_output_serial_ids.len(),
            nb_contracts
        )));
    }

    let mut outputs = Vec::with_capacity(nb_contracts + 2);
    let mut serial_ids = Vec::with_capacity(nb_contracts + 2);

    for (i, (script, amount)) in funding_script_pubkeys
        .iter()
        .zip(output_amounts.iter())
        .enumerate()
    {
        outputs.push(TxOut {
            value: *amount,
            script_pubkey: script.to_v0_p2wsh(),
        });
        serial_ids.push(if fund_output_serial_ids.is_empty() {
            0
        } else {
            fund_output_serial_ids[i]
        });
    }

    outputs.push(local_change_output);
    serial_ids.push(local_change_serial_id);
    outputs.push(remote_change_output);
    serial_ids.push(remote_change_serial_id);

    let output = util::order_by_serial_ids(outputs, &serial_ids);

    let input = util::order_by_serial_ids(
        [local_inputs, remote_inputs].concat(),
        &[local_inputs_serial_ids, remote_inputs_serial_ids].concat(),
    );

    Ok(Transaction {
        version: TX_VERSION,
        lock_time: PackedLockTime(lock_time),
        input,
        output,
    })
}

/// Returns the position of each funding output within the serial id ordered
/// outputs of the fund transaction. An empty `fund_output_serial_ids` maps
/// the funding outputs to positions `0..N` unconditionally.
fn get_fund_output_positions(
    fund_output_serial_ids: &[u64],
    local_change_serial_id: u64,
    remote_change_serial_id: u64,
    nb_contracts: usize,
) -> Vec<usize> {
    if fund_output_serial_ids.is_empty() {
        return (0..nb_contracts).collect();
    }

    let mut all_serial_ids = fund_output_serial_ids.to_vec();
    all_serial_ids.push(local_change_serial_id);
    all_serial_ids.push(remote_change_serial_id);
    all_serial_ids.sort_unstable();

    fund_output_serial_ids
        .iter()
        .map(|id| {
            all_serial_ids
                .iter()
                .position(|x| x == id)
                .expect("the fund output serial id to be present")
        })
        .collect()
}

fn sum_amounts(amounts: &[u64]) -> Result<u64, Error> {
    let mut total: u64 = 0;
    for amount in amounts {
        total = checked_add!(total, *amount)?;
    }
    Ok(total)
}
