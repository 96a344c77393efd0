//! Typed chain transactions.
//!
//! Raw indexer JSON is decoded into a tagged [`Transaction`] at the
//! stream boundary; nothing downstream ever inspects raw maps.

use crate::types::AssetId;
use serde::Deserialize;
use thiserror::Error;

/// A key/value entry of an application state delta. Keys are
/// base64-encoded byte strings.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: DeltaValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeltaValue {
    #[serde(default)]
    pub action: Option<u8>,
    #[serde(default)]
    pub uint: Option<u64>,
    #[serde(default)]
    pub bytes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalStateDelta {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub delta: Vec<KeyValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentPayload {
    pub receiver: String,
    pub amount: u64,
    #[serde(rename = "close-to", default)]
    pub close_to: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetTransferPayload {
    pub receiver: String,
    pub amount: u64,
    #[serde(rename = "asset-id")]
    pub asset_id: AssetId,
    #[serde(rename = "close-to", default)]
    pub close_to: Option<String>,
}

/// Wire shape of one indexer transaction. Only the fields the engine
/// consumes are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "tx-type")]
    pub tx_type: String,
    pub sender: String,
    #[serde(rename = "round-time")]
    pub round_time: u64,
    #[serde(rename = "confirmed-round")]
    pub confirmed_round: u64,
    #[serde(rename = "payment-transaction", default)]
    pub payment: Option<PaymentPayload>,
    #[serde(rename = "asset-transfer-transaction", default)]
    pub asset_transfer: Option<AssetTransferPayload>,
    #[serde(rename = "local-state-delta", default)]
    pub local_state_delta: Option<Vec<LocalStateDelta>>,
}

#[derive(Debug, Error)]
pub enum TxDecodeError {
    #[error("{tx_type} transaction missing its payload")]
    MissingPayload { tx_type: String },
}

/// An application call that may carry a local-state delta.
#[derive(Debug, Clone)]
pub struct ApplCall {
    pub sender: String,
    pub round_time: u64,
    pub confirmed_round: u64,
    /// First account's delta entries, when a local-state delta is present.
    pub local_state_delta: Option<Vec<KeyValue>>,
}

/// Native-asset payment.
#[derive(Debug, Clone)]
pub struct Payment {
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
    pub close_to: Option<String>,
    pub round_time: u64,
    pub confirmed_round: u64,
}

/// Non-native asset transfer.
#[derive(Debug, Clone)]
pub struct AssetTransfer {
    pub sender: String,
    pub receiver: String,
    pub asset_id: AssetId,
    pub amount: u64,
    pub close_to: Option<String>,
    pub round_time: u64,
    pub confirmed_round: u64,
}

/// A decoded chain transaction of a kind the engine understands.
#[derive(Debug, Clone)]
pub enum Transaction {
    Appl(ApplCall),
    Pay(Payment),
    Axfer(AssetTransfer),
}

impl Transaction {
    /// Decode a raw record. Unknown transaction kinds decode to `None`;
    /// a declared kind missing its payload is malformed.
    pub fn decode(record: TransactionRecord) -> Result<Option<Transaction>, TxDecodeError> {
        match record.tx_type.as_str() {
            "appl" => Ok(Some(Transaction::Appl(ApplCall {
                sender: record.sender,
                round_time: record.round_time,
                confirmed_round: record.confirmed_round,
                local_state_delta: record
                    .local_state_delta
                    .and_then(|mut deltas| {
                        if deltas.is_empty() {
                            None
                        } else {
                            Some(deltas.remove(0).delta)
                        }
                    }),
            }))),
            "pay" => {
                let payment = record.payment.ok_or(TxDecodeError::MissingPayload {
                    tx_type: "pay".to_string(),
                })?;
                Ok(Some(Transaction::Pay(Payment {
                    sender: record.sender,
                    receiver: payment.receiver,
                    amount: payment.amount,
                    close_to: payment.close_to,
                    round_time: record.round_time,
                    confirmed_round: record.confirmed_round,
                })))
            }
            "axfer" => {
                let transfer = record.asset_transfer.ok_or(TxDecodeError::MissingPayload {
                    tx_type: "axfer".to_string(),
                })?;
                Ok(Some(Transaction::Axfer(AssetTransfer {
                    sender: record.sender,
                    receiver: transfer.receiver,
                    asset_id: transfer.asset_id,
                    amount: transfer.amount,
                    close_to: transfer.close_to,
                    round_time: record.round_time,
                    confirmed_round: record.confirmed_round,
                })))
            }
            _ => Ok(None),
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Transaction::Appl(t) => &t.sender,
            Transaction::Pay(t) => &t.sender,
            Transaction::Axfer(t) => &t.sender,
        }
    }

    pub fn round_time(&self) -> u64 {
        match self {
            Transaction::Appl(t) => t.round_time,
            Transaction::Pay(t) => t.round_time,
            Transaction::Axfer(t) => t.round_time,
        }
    }

    pub fn confirmed_round(&self) -> u64 {
        match self {
            Transaction::Appl(t) => t.confirmed_round,
            Transaction::Pay(t) => t.confirmed_round,
            Transaction::Axfer(t) => t.confirmed_round,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pay() {
        let raw = serde_json::json!({
            "tx-type": "pay",
            "sender": "USER",
            "round-time": 100,
            "confirmed-round": 7,
            "payment-transaction": {"receiver": "POOL", "amount": 2000},
        });
        let record: TransactionRecord = serde_json::from_value(raw).unwrap();
        match Transaction::decode(record).unwrap().unwrap() {
            Transaction::Pay(pay) => {
                assert_eq!(pay.receiver, "POOL");
                assert_eq!(pay.amount, 2000);
                assert_eq!(pay.close_to, None);
            }
            other => panic!("expected pay, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_kind_is_skipped() {
        let raw = serde_json::json!({
            "tx-type": "acfg",
            "sender": "X",
            "round-time": 1,
            "confirmed-round": 1,
        });
        let record: TransactionRecord = serde_json::from_value(raw).unwrap();
        assert!(Transaction::decode(record).unwrap().is_none());
    }

    #[test]
    fn test_decode_missing_payload_is_malformed() {
        let raw = serde_json::json!({
            "tx-type": "axfer",
            "sender": "X",
            "round-time": 1,
            "confirmed-round": 1,
        });
        let record: TransactionRecord = serde_json::from_value(raw).unwrap();
        assert!(Transaction::decode(record).is_err());
    }

    #[test]
    fn test_decode_appl_keeps_first_account_delta() {
        let raw = serde_json::json!({
            "tx-type": "appl",
            "sender": "POOL",
            "round-time": 5,
            "confirmed-round": 2,
            "local-state-delta": [
                {"address": "POOL", "delta": [
                    {"key": "czE=", "value": {"action": 1, "uint": 10}},
                ]},
            ],
        });
        let record: TransactionRecord = serde_json::from_value(raw).unwrap();
        match Transaction::decode(record).unwrap().unwrap() {
            Transaction::Appl(appl) => {
                let delta = appl.local_state_delta.unwrap();
                assert_eq!(delta.len(), 1);
                assert_eq!(delta[0].value.uint, Some(10));
            }
            other => panic!("expected appl, got {other:?}"),
        }
    }
}
