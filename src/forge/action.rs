//! Transfer action payload.

use super::bencodex::Value;
use crate::core_types::Address;
use crate::network::Currency;

/// Action type understood by the chain for a single-asset transfer
pub const TRANSFER_TYPE_ID: &str = "transfer_asset5";

#[derive(Debug, Clone)]
pub struct TransferAction {
    pub currency: Currency,
    pub sender: Address,
    pub recipient: Address,
    /// Quantity in the currency's smallest unit
    pub units: i64,
}

impl TransferAction {
    fn currency_value(&self) -> Value {
        let minters = if self.currency.minters.is_empty() {
            Value::Null
        } else {
            Value::List(
                self.currency
                    .minters
                    .iter()
                    .map(|m| Value::Binary(m.as_bytes().to_vec()))
                    .collect(),
            )
        };
        Value::text_dict([
            ("decimalPlaces", Value::Binary(vec![self.currency.decimal_places])),
            ("minters", minters),
            ("ticker", Value::Text(self.currency.ticker.clone())),
        ])
    }

    pub fn to_value(&self) -> Value {
        let values = Value::text_dict([
            (
                "amount",
                Value::List(vec![self.currency_value(), Value::Integer(self.units.into())]),
            ),
            ("recipient", Value::Binary(self.recipient.as_bytes().to_vec())),
            ("sender", Value::Binary(self.sender.as_bytes().to_vec())),
        ]);
        Value::text_dict([
            ("type_id", Value::Text(TRANSFER_TYPE_ID.to_string())),
            ("values", values),
        ])
    }

    /// Hex of the encoded action, as the unsigned-transaction call expects
    pub fn encode_hex(&self) -> String {
        hex::encode(self.to_value().encode())
    }
}
