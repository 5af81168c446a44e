//! Static description of the tag registry contract: event layouts and
//! view-function signatures.
//!
//! Topic0 of an event is `keccak256("Name(type1,type2,...)")`; a function
//! selector is the first four bytes of `keccak256("name(types)")`.

use std::fmt;

use alloy_core::dyn_abi::DynSolType;
use tagledger_core::error::RegistryError;
use tagledger_core::ids::{keccak256, word_hex, TokenId};

/// The two event kinds the registry emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AssetRegistered,
    EventLogged,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::AssetRegistered, EventKind::EventLogged];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssetRegistered => f.write_str("AssetRegistered"),
            Self::EventLogged => f.write_str("EventLogged"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Solidity type, e.g. `bytes32` or `uint256`.
    pub ty: &'static str,
    pub indexed: bool,
}

const fn field(name: &'static str, ty: &'static str, indexed: bool) -> FieldSpec {
    FieldSpec { name, ty, indexed }
}

impl FieldSpec {
    pub fn sol_type(&self) -> Result<DynSolType, RegistryError> {
        DynSolType::parse(self.ty)
            .map_err(|e| RegistryError::decode(format!("field '{}': {e}", self.name)))
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Layout of one event: fields in declaration order.
#[derive(Debug, Clone)]
pub struct EventSpec {
    pub kind: EventKind,
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
    topic0: String,
}

impl EventSpec {
    pub fn new(kind: EventKind, name: &'static str, fields: Vec<FieldSpec>) -> Self {
        let signature = canonical_signature(name, fields.iter().map(|f| f.ty));
        Self {
            kind,
            name,
            fields,
            topic0: word_hex(&keccak256(signature.as_bytes())),
        }
    }

    /// `Name(type1,type2,...)`.
    pub fn signature(&self) -> String {
        canonical_signature(self.name, self.fields.iter().map(|f| f.ty))
    }

    pub fn topic0(&self) -> &str {
        &self.topic0
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.indexed)
    }

    pub fn data_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.indexed)
    }

    /// Topic position (1-based) of an indexed field.
    pub fn topic_slot(&self, field: &str) -> Option<usize> {
        self.indexed_fields()
            .position(|f| f.name == field)
            .map(|i| i + 1)
    }

    /// Build the positional topic list for a log query: topic0 followed by
    /// one slot per indexed field, filled where a filter names it.
    pub fn query(&self, filters: &[IndexedFilter]) -> Result<TopicQuery, RegistryError> {
        let mut topics = vec![None; self.indexed_fields().count() + 1];
        topics[0] = Some(self.topic0.clone());
        for filter in filters {
            let slot = self.topic_slot(filter.field).ok_or_else(|| {
                RegistryError::validation(format!(
                    "{} has no indexed field '{}'",
                    self.name, filter.field
                ))
            })?;
            topics[slot] = Some(word_hex(&filter.word));
        }
        Ok(TopicQuery {
            kind: self.kind,
            event: self.name,
            topics,
        })
    }
}

/// Equality filter on an indexed field, as a 32-byte zero-padded word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFilter {
    pub field: &'static str,
    pub word: [u8; 32],
}

impl IndexedFilter {
    pub fn token(id: &TokenId) -> Self {
        Self {
            field: "tokenId",
            word: *id.as_bytes(),
        }
    }
}

/// A ready-to-send topic filter for one event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicQuery {
    pub kind: EventKind,
    pub event: &'static str,
    pub topics: Vec<Option<String>>,
}

// ─── Functions ───────────────────────────────────────────────────────────────

/// A view function with a single return value.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub inputs: Vec<&'static str>,
    pub output: &'static str,
}

impl FunctionSpec {
    pub fn signature(&self) -> String {
        canonical_signature(self.name, self.inputs.iter().copied())
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.signature().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

fn canonical_signature<'a>(name: &str, types: impl Iterator<Item = &'a str>) -> String {
    format!("{name}({})", types.collect::<Vec<_>>().join(","))
}

// ─── Descriptor ──────────────────────────────────────────────────────────────

/// Read-only contract description, built once at startup.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    registered: EventSpec,
    logged: EventSpec,
    functions: Vec<FunctionSpec>,
}

impl ContractDescriptor {
    /// The RFID tag registry.
    pub fn registry() -> Self {
        let registered = EventSpec::new(
            EventKind::AssetRegistered,
            "NFTRegistered",
            vec![
                field("tokenId", "bytes32", true),
                field("nftId", "uint256", true),
                field("timestamp", "uint256", false),
            ],
        );
        let logged = EventSpec::new(
            EventKind::EventLogged,
            "EventLogged",
            vec![
                field("nftId", "uint256", true),
                field("tokenId", "bytes32", true),
                field("eventIndex", "uint256", false),
                field("message", "string", false),
                field("timestamp", "uint256", false),
            ],
        );
        let view = |name, inputs: &[&'static str], output| FunctionSpec {
            name,
            inputs: inputs.to_vec(),
            output,
        };
        let functions = vec![
            view("isTokenRegistered", &["bytes32"], "bool"),
            view("getNFTId", &["bytes32"], "uint256"),
            view("ownerOf", &["uint256"], "address"),
            view("eventCounts", &["uint256"], "uint256"),
            view("getEventMessage", &["uint256", "uint256"], "string"),
            view("owner", &[], "address"),
        ];
        Self {
            registered,
            logged,
            functions,
        }
    }

    pub fn events(&self) -> [&EventSpec; 2] {
        [&self.registered, &self.logged]
    }

    pub fn event(&self, kind: EventKind) -> &EventSpec {
        match kind {
            EventKind::AssetRegistered => &self.registered,
            EventKind::EventLogged => &self.logged,
        }
    }

    /// Match topic0 (case-insensitive) to an event layout.
    pub fn by_topic(&self, topic0: &str) -> Option<&EventSpec> {
        self.events()
            .into_iter()
            .find(|e| e.topic0.eq_ignore_ascii_case(topic0))
    }

    pub fn function(&self, name: &str) -> Result<&FunctionSpec, RegistryError> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| RegistryError::state_query(name, "function not in contract descriptor"))
    }

    pub fn function_by_selector(&self, selector: &[u8]) -> Option<&FunctionSpec> {
        self.functions
            .iter()
            .find(|f| f.selector().as_slice() == selector)
    }
}
