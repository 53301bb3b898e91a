//! Subscription topics, their filter-method aliases and notification payloads.
//!
//! Every topic exists under three names: a version-1 name kept for old wallets, and two
//! version-2 names. The version decides the payload shape, the category decides which event
//! feeds the topic and which arguments it takes.

use serde_json::{json, Value};

use crate::{
    middleware::validation::{is_hash, parse_height, ValidationError},
    types::{block_type, AccountBlock},
    utils::ViteAddress,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCategory {
    Snapshot,
    Account,
    AccountByAddress,
    Unreceived,
    VmLog,
}

/// One subscribable topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topic {
    pub name: &'static str,
    /// `subscribe_<filter_method>` creates a poll filter on this topic.
    pub filter_method: &'static str,
    pub category: TopicCategory,
    pub version: u8,
}

const fn topic(
    name: &'static str,
    filter_method: &'static str,
    category: TopicCategory,
    version: u8,
) -> Topic {
    Topic { name, filter_method, category, version }
}

pub const TOPICS: [Topic; 15] = [
    topic("newSnapshotBlocks", "newSnapshotBlocksFilter", TopicCategory::Snapshot, 1),
    topic("createSnapshotBlockSubscription", "createSnapshotBlockFilter", TopicCategory::Snapshot, 2),
    topic("newSnapshotBlock", "newSnapshotBlockFilter", TopicCategory::Snapshot, 2),
    topic("newAccountBlocks", "newAccountBlocksFilter", TopicCategory::Account, 1),
    topic("createAccountBlockSubscription", "createAccountBlockFilter", TopicCategory::Account, 2),
    topic("newAccountBlock", "newAccountBlockFilter", TopicCategory::Account, 2),
    topic("newAccountBlocksByAddr", "newAccountBlocksByAddrFilter", TopicCategory::AccountByAddress, 1),
    topic(
        "createAccountBlockSubscriptionByAddress",
        "createAccountBlockFilterByAddress",
        TopicCategory::AccountByAddress,
        2,
    ),
    topic(
        "newAccountBlockByAddress",
        "newAccountBlockByAddressFilter",
        TopicCategory::AccountByAddress,
        2,
    ),
    topic("newOnroadBlocksByAddr", "newOnroadBlocksByAddrFilter", TopicCategory::Unreceived, 1),
    topic(
        "createUnreceivedBlockSubscriptionByAddress",
        "createUnreceivedBlockFilterByAddress",
        TopicCategory::Unreceived,
        2,
    ),
    topic(
        "newUnreceivedBlockByAddress",
        "newUnreceivedBlockByAddressFilter",
        TopicCategory::Unreceived,
        2,
    ),
    topic("newLogs", "newLogsFilter", TopicCategory::VmLog, 1),
    topic("createVmlogSubscription", "createVmLogFilter", TopicCategory::VmLog, 2),
    topic("newVmLog", "newVmLogFilter", TopicCategory::VmLog, 2),
];

impl Topic {
    #[must_use]
    pub fn by_name(name: &str) -> Option<&'static Topic> {
        TOPICS.iter().find(|topic| topic.name == name)
    }

    #[must_use]
    pub fn by_filter_method(method: &str) -> Option<&'static Topic> {
        TOPICS.iter().find(|topic| topic.filter_method == method)
    }
}

pub fn snapshot_payload(version: u8, height: u64, hash: &str, removed: bool) -> Value {
    if version == 1 {
        json!({ "height": height, "heightStr": height.to_string(), "hash": hash, "removed": removed })
    } else {
        json!({ "height": height.to_string(), "hash": hash, "removed": removed })
    }
}

pub fn account_payload(hash: &str, removed: bool) -> Value {
    json!({ "hash": hash, "removed": removed })
}

/// Payload for the by-address topics, or `None` when the block belongs to another account.
pub fn by_address_payload(
    version: u8,
    address: &str,
    block: &AccountBlock,
    removed: bool,
) -> Option<Value> {
    if block.address != address {
        return None;
    }
    Some(if version == 1 {
        let height = block.height.parse::<u64>().unwrap_or_default();
        json!({ "height": height, "heightStr": block.height, "hash": block.hash, "removed": removed })
    } else {
        json!({ "height": block.height, "hash": block.hash, "removed": removed })
    })
}

/// Payload for the unreceived-block topics, skipping receive-side blocks.
pub fn unreceived_payload(
    version: u8,
    address: &str,
    block: &AccountBlock,
    removed: bool,
) -> Option<Value> {
    if block.to_address != address || block_type::is_receive_kind(block.block_type) {
        return None;
    }
    let received = block.is_received();
    Some(if version == 1 {
        json!({ "closed": received, "hash": block.hash, "removed": removed })
    } else {
        json!({ "received": received, "hash": block.hash, "removed": removed })
    })
}

/// Inclusive height window for one contract; `to == 0` leaves it open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightRange {
    pub from: u64,
    pub to: u64,
}

impl HeightRange {
    #[must_use]
    pub fn contains(&self, height: u64) -> bool {
        height >= self.from && (self.to == 0 || height <= self.to)
    }
}

/// Parsed `[{addressHeightRange, topics}]` argument of the vmlog topics.
///
/// Heights are coerced to integers during parsing so the listener only ever compares numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmLogFilter {
    pub ranges: Vec<(ViteAddress, HeightRange)>,
    pub topics: Vec<Vec<String>>,
}

/// Failures specific to the vmlog arguments, beyond plain shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmLogFilterError {
    Invalid(ValidationError),
    InvertedRange,
}

impl From<ValidationError> for VmLogFilterError {
    fn from(err: ValidationError) -> Self {
        Self::Invalid(err)
    }
}

impl VmLogFilter {
    /// Parses the subscription arguments following the topic name.
    ///
    /// # Errors
    /// Returns [`VmLogFilterError::InvertedRange`] when `toHeight < fromHeight` with a non-zero
    /// `toHeight`, and [`VmLogFilterError::Invalid`] for any shape violation.
    pub fn parse(args: &[Value]) -> Result<Self, VmLogFilterError> {
        if args.len() != 1 {
            return Err(ValidationError::ParamCount(1).into());
        }
        let Some(params) = args[0].as_object() else {
            return Err(ValidationError::Param(0, "must be of type object").into());
        };

        let Some(range_map) = params.get("addressHeightRange") else {
            return Err(ValidationError::Required("[0].addressHeightRange").into());
        };
        let Some(range_map) = range_map.as_object() else {
            return Err(ValidationError::Param(0, "addressHeightRange must be of type object").into());
        };

        let mut ranges = Vec::with_capacity(range_map.len());
        for (address, range) in range_map {
            let address: ViteAddress = address
                .parse()
                .map_err(|_| ValidationError::Param(0, "addressHeightRange keys must be vite addresses"))?;
            let from = range.get("fromHeight").and_then(parse_height);
            let to = range.get("toHeight").and_then(parse_height);
            let (Some(from), Some(to)) = (from, to) else {
                return Err(ValidationError::Param(
                    0,
                    "fromHeight and toHeight must be integers >= 0 or decimal strings",
                )
                .into());
            };
            if to < from && to != 0 {
                return Err(VmLogFilterError::InvertedRange);
            }
            ranges.push((address, HeightRange { from, to }));
        }

        let topics = match params.get("topics") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(positions)) => positions
                .iter()
                .map(|position| {
                    let Some(hashes) = position.as_array() else {
                        return Err(ValidationError::Param(0, "topics must be an array of arrays"));
                    };
                    hashes
                        .iter()
                        .map(|hash| match hash.as_str() {
                            Some(hash) if is_hash(hash) => Ok(hash.to_string()),
                            _ => Err(ValidationError::Param(0, "topics must contain 64 character hashes")),
                        })
                        .collect()
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(ValidationError::Param(0, "topics must be an array").into()),
        };

        Ok(Self { ranges, topics })
    }

    /// Whether a log pushed by the upstream `newVmLog` subscription passes this filter.
    #[must_use]
    pub fn matches(&self, log: &Value) -> bool {
        let observed = log.pointer("/vmlog/topics").and_then(Value::as_array);
        for (i, wanted) in self.topics.iter().enumerate() {
            if wanted.is_empty() {
                continue;
            }
            let topic = observed.and_then(|topics| topics.get(i)).and_then(Value::as_str);
            if !topic.is_some_and(|topic| wanted.iter().any(|w| w == topic)) {
                return false;
            }
        }

        let Some(height) = log.get("accountBlockHeight").and_then(parse_height) else {
            return false;
        };
        let Some(address) = log.get("address").and_then(Value::as_str) else {
            return false;
        };
        self.ranges
            .iter()
            .find(|(candidate, _)| candidate.to_string() == address)
            .is_some_and(|(_, range)| range.contains(height))
    }
}
