use std::hash::{Hash, Hasher};

use chrono::{NaiveDateTime, SubsecRound, Timelike};
use coursedb_proto::Value;

use crate::error::{Error, Result};
use crate::identity::{Identity, KeyPart};
use crate::query::EntityNode;

use super::{read_datetime, read_opt_string, read_string, Entity, Record};

/// Composite order key.
///
/// Order dates are stored with microsecond precision. [`OrderId::new`]
/// truncates finer dates, so two keys that the store cannot tell apart also
/// compare equal in memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderId {
    pub username: String,
    pub order_date: NaiveDateTime,
}

impl OrderId {
    pub fn new(username: impl Into<String>, order_date: NaiveDateTime) -> Self {
        Self {
            username: username.into(),
            order_date: order_date.trunc_subsecs(6),
        }
    }

    /// Key components in declaration order.
    pub fn identity(&self) -> Identity {
        Identity::Composite(vec![
            KeyPart::from(self.username.as_str()),
            KeyPart::from(self.order_date),
        ])
    }
}

/// Delivery address embedded in an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Address {
    pub street_name: String,
    pub house_no: String,
}

impl Address {
    pub fn new(street_name: impl Into<String>, house_no: impl Into<String>) -> Self {
        Self {
            street_name: street_name.into(),
            house_no: house_no.into(),
        }
    }
}

/// An order. Equality and hashing use only [`OrderId`].
#[derive(Debug, Clone)]
pub struct Order {
    id: OrderId,
    pub order_info: String,
    pub address: Option<Address>,
}

impl Order {
    pub fn new(id: OrderId, order_info: impl Into<String>) -> Self {
        Self {
            id,
            order_info: order_info.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// The key; fixed at construction.
    pub fn id(&self) -> &OrderId {
        &self.id
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Order {}

impl Hash for Order {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Entity for Order {
    const KIND: &'static str = "Order";

    fn to_record(&self) -> Result<Record> {
        if self.id.order_date.nanosecond() % 1_000 != 0 {
            return Err(Error::InvalidData(format!(
                "order date {} is finer than microseconds",
                self.id.order_date
            )));
        }
        let (street, house) = match &self.address {
            Some(a) => (
                Value::from(a.street_name.as_str()),
                Value::from(a.house_no.as_str()),
            ),
            None => (Value::Null, Value::Null),
        };
        Ok(Record::new(Self::KIND, Some(self.id.identity()))
            .with_field("orderInfo", self.order_info.as_str())
            .with_field("address.streetName", street)
            .with_field("address.houseNo", house))
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        let street = read_opt_string(node, "address.streetName")?;
        let house = read_opt_string(node, "address.houseNo")?;
        let address = match (street, house) {
            (None, None) => None,
            (street, house) => Some(Address {
                street_name: street.unwrap_or_default(),
                house_no: house.unwrap_or_default(),
            }),
        };
        Ok(Self {
            id: OrderId::new(
                read_string(node, "id.username")?,
                read_datetime(node, "id.orderDate")?,
            ),
            order_info: read_string(node, "orderInfo")?,
            address,
        })
    }

    // Keys are caller-supplied and never reassigned.
    fn assign_identity(&mut self, _identity: &Identity) {}
}

impl TryFrom<&Identity> for OrderId {
    type Error = Error;

    fn try_from(identity: &Identity) -> Result<Self> {
        match identity {
            Identity::Composite(parts) => match parts.as_slice() {
                [KeyPart::Str(username), KeyPart::Timestamp(micros)] => {
                    let order_date = Value::Timestamp(*micros).as_datetime().ok_or_else(|| {
                        Error::InvalidData(format!("order date out of range: {}", micros))
                    })?;
                    Ok(OrderId::new(username.clone(), order_date))
                }
                _ => Err(Error::InvalidData(format!("not an order key: {}", identity))),
            },
            Identity::Simple(_) => Err(Error::InvalidData(format!("not an order key: {}", identity))),
        }
    }
}
