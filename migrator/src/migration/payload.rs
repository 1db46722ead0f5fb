use ethers::types::{Address, H256};
use protobuf::{wire_format::WireType, CodedInputStream, CodedOutputStream, ProtobufResult};

use crate::MigratorError;

use super::ChannelId;

// `ChannelMigrationRequest` fields
const MIGRATION_INFO_FIELD: u32 = 1;
const REQUESTER_SIG_FIELD: u32 = 2;
const APPROVER_SIG_FIELD: u32 = 3;

// `ChannelMigrationInfo` fields
const CHANNEL_ID_FIELD: u32 = 1;
const FROM_LEDGER_FIELD: u32 = 2;
const TO_LEDGER_FIELD: u32 = 3;
const MIGRATION_DEADLINE_FIELD: u32 = 4;

/// The migration terms both channel peers signed over. Carried inside the opaque
/// migration request that is submitted to the ledger contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMigrationInfo {
    pub channel_id: ChannelId,
    pub from_ledger: Address,
    pub to_ledger: Address,
    pub migration_deadline: u64,
}

impl ChannelMigrationInfo {
    /// Extract the signed migration terms from a serialized `ChannelMigrationRequest`
    pub fn from_migration_request(migration_request: &[u8]) -> Result<Self, MigratorError> {
        let info = read_migration_info(migration_request).map_err(malformed)?;
        match info {
            Some(info) => Self::decode(&info),
            None => Err(MigratorError::MalformedRequest(
                "missing channel migration info".to_owned(),
            )),
        }
    }

    /// Read only the source ledger out of a serialized `ChannelMigrationRequest`. The
    /// other info fields are not checked, and an address of the wrong length is
    /// right-aligned into 20 bytes the way EVM tooling converts bytes to an address.
    pub fn source_ledger(migration_request: &[u8]) -> Result<Address, MigratorError> {
        let info = read_migration_info(migration_request)
            .map_err(malformed)?
            .ok_or_else(|| {
                MigratorError::MalformedRequest("missing channel migration info".to_owned())
            })?;
        match read_field(&info, FROM_LEDGER_FIELD).map_err(malformed)? {
            Some(bytes) if !bytes.is_empty() => Ok(right_aligned_address(&bytes)),
            _ => Err(MigratorError::MalformedRequest(
                "missing from ledger address".to_owned(),
            )),
        }
    }

    /// Decode a serialized `ChannelMigrationInfo`
    pub fn decode(bytes: &[u8]) -> Result<Self, MigratorError> {
        let mut is = CodedInputStream::from_bytes(bytes);
        let mut channel_id = None;
        let mut from_ledger = None;
        let mut to_ledger = None;
        let mut migration_deadline = 0;
        while !is.eof().map_err(malformed)? {
            let (field, wire_type) = is.read_tag_unpack().map_err(malformed)?;
            let length_delimited = wire_type == WireType::WireTypeLengthDelimited;
            match field {
                CHANNEL_ID_FIELD if length_delimited => {
                    channel_id = Some(is.read_bytes().map_err(malformed)?)
                }
                FROM_LEDGER_FIELD if length_delimited => {
                    from_ledger = Some(is.read_bytes().map_err(malformed)?)
                }
                TO_LEDGER_FIELD if length_delimited => {
                    to_ledger = Some(is.read_bytes().map_err(malformed)?)
                }
                MIGRATION_DEADLINE_FIELD if wire_type == WireType::WireTypeVarint => {
                    migration_deadline = is.read_uint64().map_err(malformed)?
                }
                _ => {
                    is.read_unknown(wire_type).map_err(malformed)?;
                }
            }
        }

        Ok(Self {
            channel_id: ChannelId(fixed_bytes::<32>("channel id", channel_id)?.into()),
            from_ledger: fixed_bytes::<20>("from ledger address", from_ledger)?.into(),
            to_ledger: fixed_bytes::<20>("to ledger address", to_ledger)?.into(),
            migration_deadline,
        })
    }

    /// Serialize as a `ChannelMigrationInfo` message
    pub fn encode(&self) -> Result<Vec<u8>, MigratorError> {
        let mut bytes = Vec::new();
        {
            let mut os = CodedOutputStream::vec(&mut bytes);
            write_info(&mut os, self).map_err(malformed)?;
        }
        Ok(bytes)
    }

    /// Wrap these terms and the peers' signatures into a `ChannelMigrationRequest`
    pub fn to_migration_request(
        &self,
        requester_sig: &[u8],
        approver_sig: &[u8],
    ) -> Result<Vec<u8>, MigratorError> {
        let info = self.encode()?;
        let mut bytes = Vec::new();
        {
            let mut os = CodedOutputStream::vec(&mut bytes);
            write_request(&mut os, &info, requester_sig, approver_sig).map_err(malformed)?;
        }
        Ok(bytes)
    }
}

fn read_migration_info(migration_request: &[u8]) -> ProtobufResult<Option<Vec<u8>>> {
    read_field(migration_request, MIGRATION_INFO_FIELD)
}

/// Last value of the length-delimited field `wanted`, skipping everything else
fn read_field(message: &[u8], wanted: u32) -> ProtobufResult<Option<Vec<u8>>> {
    let mut is = CodedInputStream::from_bytes(message);
    let mut value = None;
    while !is.eof()? {
        let (field, wire_type) = is.read_tag_unpack()?;
        if field == wanted && wire_type == WireType::WireTypeLengthDelimited {
            value = Some(is.read_bytes()?);
        } else {
            is.read_unknown(wire_type)?;
        }
    }
    Ok(value)
}

fn right_aligned_address(bytes: &[u8]) -> Address {
    let mut address = [0u8; 20];
    let tail = &bytes[bytes.len().saturating_sub(address.len())..];
    let start = address.len().saturating_sub(tail.len());
    address[start..].copy_from_slice(tail);
    address.into()
}

fn write_info(os: &mut CodedOutputStream, info: &ChannelMigrationInfo) -> ProtobufResult<()> {
    os.write_bytes(CHANNEL_ID_FIELD, info.channel_id.as_bytes())?;
    os.write_bytes(FROM_LEDGER_FIELD, info.from_ledger.as_bytes())?;
    os.write_bytes(TO_LEDGER_FIELD, info.to_ledger.as_bytes())?;
    os.write_uint64(MIGRATION_DEADLINE_FIELD, info.migration_deadline)?;
    os.flush()
}

fn write_request(
    os: &mut CodedOutputStream,
    info: &[u8],
    requester_sig: &[u8],
    approver_sig: &[u8],
) -> ProtobufResult<()> {
    os.write_bytes(MIGRATION_INFO_FIELD, info)?;
    os.write_bytes(REQUESTER_SIG_FIELD, requester_sig)?;
    os.write_bytes(APPROVER_SIG_FIELD, approver_sig)?;
    os.flush()
}

fn fixed_bytes<const N: usize>(name: &str, bytes: Option<Vec<u8>>) -> Result<[u8; N], MigratorError> {
    let bytes = bytes.ok_or_else(|| MigratorError::MalformedRequest(format!("missing {name}")))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
        MigratorError::MalformedRequest(format!(
            "{name} is {} bytes long, expected {}",
            bytes.len(),
            N
        ))
    })
}

fn malformed(err: protobuf::ProtobufError) -> MigratorError {
    MigratorError::MalformedRequest(err.to_string())
}
