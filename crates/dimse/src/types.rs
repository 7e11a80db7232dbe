//! Common types for DIMSE operations

use std::collections::BTreeMap;
use std::fmt;

use dicom_core::header::Header;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use serde::{Deserialize, Serialize};

use crate::error::{DimseError, Result};

/// Named DIMSE status codes (PS3.7 Annex C, PS3.4 Annex C)
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const PENDING: u16 = 0xFF00;
    pub const CANCEL: u16 = 0xFE00;
    /// Sub-operations complete, one or more failures or warnings
    pub const WARNING: u16 = 0xB000;
    pub const PROCESSING_FAILURE: u16 = 0x0110;
    pub const INVALID_ARGUMENT_VALUE: u16 = 0x0115;
    pub const UNSUPPORTED_SOP_CLASS: u16 = 0x0122;
    pub const UNRECOGNIZED_OPERATION: u16 = 0x0211;
    pub const UNABLE_TO_PERFORM_SUB_OPERATIONS: u16 = 0xA702;
    pub const MOVE_DESTINATION_UNKNOWN: u16 = 0xA801;
    pub const UNABLE_TO_PROCESS: u16 = 0xC000;
}

/// One element of an attribute set: value representation plus the value in
/// its DICOM string form. Multiple values are separated by `\`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub vr: VR,
    pub value: String,
}

impl Attribute {
    pub fn new(vr: VR, value: impl Into<String>) -> Self {
        Self {
            vr,
            value: value.into(),
        }
    }

    /// Value with DICOM padding (trailing spaces and NULs) removed
    pub fn trimmed(&self) -> &str {
        self.value.trim_end_matches(|c| c == ' ' || c == '\0')
    }

    /// Whether the element carries a zero-length value
    pub fn is_empty(&self) -> bool {
        self.trimmed().is_empty()
    }

    /// Iterate over the individual values of a multi-valued element
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.trimmed()
            .split('\\')
            .map(|v| v.trim_matches(|c| c == ' ' || c == '\0'))
    }
}

/// Ordered mapping from tag to typed value.
///
/// Each tag appears at most once. An absent tag and a tag with an empty value
/// are different things: the latter is a return key in a query identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<AttributeRecord>", try_from = "Vec<AttributeRecord>")]
pub struct AttributeSet {
    elements: BTreeMap<Tag, Attribute>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an element, returning the previous one
    pub fn put(&mut self, tag: Tag, vr: VR, value: impl Into<String>) -> Option<Attribute> {
        self.elements.insert(tag, Attribute::new(vr, value))
    }

    /// Builder form of [`AttributeSet::put`]
    pub fn with(mut self, tag: Tag, vr: VR, value: impl Into<String>) -> Self {
        self.put(tag, vr, value);
        self
    }

    pub fn get(&self, tag: Tag) -> Option<&Attribute> {
        self.elements.get(&tag)
    }

    /// Padding-trimmed string value of an element, if present
    pub fn value(&self, tag: Tag) -> Option<&str> {
        self.get(tag).map(Attribute::trimmed)
    }

    /// Non-empty value of an element
    pub fn required(&self, tag: Tag) -> Option<&str> {
        self.value(tag).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Attribute> {
        self.elements.remove(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tag, &Attribute)> {
        self.elements.iter()
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.elements.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Copy of this set without binary and sequence elements
    pub fn without_binary(&self) -> Self {
        let elements = self
            .elements
            .iter()
            .filter(|(_, attr)| !is_binary_vr(attr.vr))
            .map(|(tag, attr)| (*tag, attr.clone()))
            .collect();
        Self { elements }
    }

    /// Build an attribute set from a parsed DICOM object.
    ///
    /// Sequences and binary elements (pixel data and the like) are skipped.
    pub fn from_object(object: &InMemDicomObject) -> Result<Self> {
        let mut set = AttributeSet::new();
        for element in object {
            let vr = element.vr();
            if is_binary_vr(vr) {
                continue;
            }
            let value = element
                .to_str()
                .map_err(|e| DimseError::DicomObject(format!("{}: {}", element.tag(), e)))?;
            set.put(element.tag(), vr, value.into_owned());
        }
        Ok(set)
    }

    /// Convert into a `dicom-object` in-memory object for the encoding layer
    pub fn to_object(&self) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(self.elements.iter().map(|(tag, attr)| {
            let value = match attr.vr {
                VR::US => attr
                    .trimmed()
                    .parse::<u16>()
                    .map(PrimitiveValue::from)
                    .unwrap_or_else(|_| PrimitiveValue::from(attr.value.as_str())),
                VR::UL => attr
                    .trimmed()
                    .parse::<u32>()
                    .map(PrimitiveValue::from)
                    .unwrap_or_else(|_| PrimitiveValue::from(attr.value.as_str())),
                _ if attr.value.is_empty() => PrimitiveValue::Empty,
                _ => PrimitiveValue::from(attr.value.as_str()),
            };
            DataElement::new(*tag, attr.vr, value)
        }))
    }
}

fn is_binary_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::SQ | VR::OB | VR::OW | VR::OF | VR::OD | VR::OL | VR::OV | VR::UN
    )
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (tag, attr) in &self.elements {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={:?}", tag, attr.trimmed())?;
        }
        Ok(())
    }
}

/// Serialized form of one element, used by persisted indexes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub tag: String,
    pub vr: String,
    pub value: String,
}

impl From<AttributeSet> for Vec<AttributeRecord> {
    fn from(set: AttributeSet) -> Self {
        set.elements
            .into_iter()
            .map(|(tag, attr)| AttributeRecord {
                tag: format!("{:04X}{:04X}", tag.group(), tag.element()),
                vr: attr.vr.to_string().to_owned(),
                value: attr.value,
            })
            .collect()
    }
}

impl TryFrom<Vec<AttributeRecord>> for AttributeSet {
    type Error = String;

    fn try_from(records: Vec<AttributeRecord>) -> std::result::Result<Self, Self::Error> {
        let mut set = AttributeSet::new();
        for record in records {
            let tag = parse_tag(&record.tag).ok_or_else(|| format!("invalid tag {}", record.tag))?;
            let vr = match record.vr.as_bytes() {
                [a, b] => VR::from_binary([*a, *b]),
                _ => None,
            }
            .ok_or_else(|| format!("invalid VR {}", record.vr))?;
            set.put(tag, vr, record.value);
        }
        Ok(set)
    }
}

/// Parse a tag written as `GGGGEEEE`
pub fn parse_tag(s: &str) -> Option<Tag> {
    if s.len() != 8 {
        return None;
    }
    let group = u16::from_str_radix(&s[0..4], 16).ok()?;
    let element = u16::from_str_radix(&s[4..8], 16).ok()?;
    Some(Tag(group, element))
}

/// DIMSE command types handled by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimseCommand {
    /// C-ECHO command
    Echo,
    /// C-STORE command
    Store,
    /// C-FIND command
    Find,
    /// C-MOVE command
    Move,
    /// C-CANCEL request
    Cancel,
}

impl DimseCommand {
    /// Command Field (0000,0100) value of the request
    pub fn command_field(self) -> u16 {
        match self {
            DimseCommand::Store => 0x0001,
            DimseCommand::Find => 0x0020,
            DimseCommand::Move => 0x0021,
            DimseCommand::Echo => 0x0030,
            DimseCommand::Cancel => 0x0FFF,
        }
    }

    /// Resolve a request Command Field value
    pub fn from_command_field(field: u16) -> Option<Self> {
        match field {
            0x0001 => Some(DimseCommand::Store),
            0x0020 => Some(DimseCommand::Find),
            0x0021 => Some(DimseCommand::Move),
            0x0030 => Some(DimseCommand::Echo),
            0x0FFF => Some(DimseCommand::Cancel),
            _ => None,
        }
    }

    /// Command Field value of the matching response
    pub fn response_field(self) -> u16 {
        self.command_field() | 0x8000
    }

    /// Build a minimal request command set for this command
    pub fn command_set(self, message_id: u16, sop_class_uid: &str) -> AttributeSet {
        AttributeSet::new()
            .with(tags::AFFECTED_SOP_CLASS_UID, VR::UI, sop_class_uid)
            .with(tags::COMMAND_FIELD, VR::US, self.command_field().to_string())
            .with(tags::MESSAGE_ID, VR::US, message_id.to_string())
    }
}

impl fmt::Display for DimseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimseCommand::Echo => write!(f, "C-ECHO"),
            DimseCommand::Store => write!(f, "C-STORE"),
            DimseCommand::Find => write!(f, "C-FIND"),
            DimseCommand::Move => write!(f, "C-MOVE"),
            DimseCommand::Cancel => write!(f, "C-CANCEL"),
        }
    }
}

/// DICOM query/retrieve levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryLevel {
    /// Patient level
    Patient,
    /// Study level
    Study,
    /// Series level
    Series,
    /// Image level
    Image,
}

impl QueryLevel {
    /// Level named by the QueryRetrieveLevel (0008,0052) key of an identifier
    pub fn of(identifier: &AttributeSet) -> Option<Self> {
        identifier
            .required(tags::QUERY_RETRIEVE_LEVEL)
            .and_then(|s| s.parse().ok())
    }
}

/// DIMSE operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    /// Operation completed successfully
    Success,
    /// Operation is pending (more responses to follow)
    Pending,
    /// Operation cancelled by user
    Cancel,
    /// Operation failed with error
    Failure(u16), // DICOM status code
    /// Warning occurred during operation
    Warning(u16), // DICOM status code
}

impl DimseStatus {
    pub fn processing_failure() -> Self {
        DimseStatus::Failure(status::PROCESSING_FAILURE)
    }

    pub fn invalid_argument_value() -> Self {
        DimseStatus::Failure(status::INVALID_ARGUMENT_VALUE)
    }

    pub fn unsupported_sop_class() -> Self {
        DimseStatus::Failure(status::UNSUPPORTED_SOP_CLASS)
    }

    pub fn move_destination_unknown() -> Self {
        DimseStatus::Failure(status::MOVE_DESTINATION_UNKNOWN)
    }

    pub fn unable_to_process() -> Self {
        DimseStatus::Failure(status::UNABLE_TO_PROCESS)
    }

    /// Numeric status code sent on the wire
    pub fn code(&self) -> u16 {
        match self {
            DimseStatus::Success => status::SUCCESS,
            DimseStatus::Pending => status::PENDING,
            DimseStatus::Cancel => status::CANCEL,
            DimseStatus::Failure(code) | DimseStatus::Warning(code) => *code,
        }
    }

    /// Classify a numeric status code
    pub fn from_code(code: u16) -> Self {
        match code {
            status::SUCCESS => DimseStatus::Success,
            0xFF00 | 0xFF01 => DimseStatus::Pending,
            status::CANCEL => DimseStatus::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => DimseStatus::Warning(code),
            _ => DimseStatus::Failure(code),
        }
    }

    /// Whether this status ends the response sequence of a request
    pub fn is_final(&self) -> bool {
        !matches!(self, DimseStatus::Pending)
    }
}

impl fmt::Display for DimseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimseStatus::Success => write!(f, "Success"),
            DimseStatus::Pending => write!(f, "Pending"),
            DimseStatus::Cancel => write!(f, "Cancel"),
            DimseStatus::Failure(code) => write!(f, "Failure(0x{:04X})", code),
            DimseStatus::Warning(code) => write!(f, "Warning(0x{:04X})", code),
        }
    }
}

/// Sub-operation counters carried by C-MOVE responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubOperationCounts {
    pub remaining: u32,
    pub completed: u32,
    pub failed: u32,
    pub warning: u32,
}

impl SubOperationCounts {
    /// Counters for a freshly matched set of `total` instances
    pub fn new(total: u32) -> Self {
        Self {
            remaining: total,
            ..Default::default()
        }
    }

    /// Number of sub-operations attempted so far
    pub fn attempted(&self) -> u32 {
        self.completed + self.failed + self.warning
    }

    /// Write the counters into a response command set. The elements are US,
    /// so counts above 65535 are written as 65535.
    pub fn write_to(&self, command: &mut AttributeSet) {
        let fields = [
            (tags::NUMBER_OF_REMAINING_SUBOPERATIONS, self.remaining),
            (tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, self.completed),
            (tags::NUMBER_OF_FAILED_SUBOPERATIONS, self.failed),
            (tags::NUMBER_OF_WARNING_SUBOPERATIONS, self.warning),
        ];
        for (tag, count) in fields {
            let value = u16::try_from(count).unwrap_or(u16::MAX);
            command.put(tag, VR::US, value.to_string());
        }
    }
}

impl fmt::Display for QueryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryLevel::Patient => write!(f, "PATIENT"),
            QueryLevel::Study => write!(f, "STUDY"),
            QueryLevel::Series => write!(f, "SERIES"),
            QueryLevel::Image => write!(f, "IMAGE"),
        }
    }
}

impl std::str::FromStr for QueryLevel {
    type Err = DimseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PATIENT" => Ok(QueryLevel::Patient),
            "STUDY" => Ok(QueryLevel::Study),
            "SERIES" => Ok(QueryLevel::Series),
            "IMAGE" => Ok(QueryLevel::Image),
            _ => Err(DimseError::config(format!("Invalid query level: {}", s))),
        }
    }
}
