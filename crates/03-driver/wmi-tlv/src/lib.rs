//! Compact TLV catalog for the WMI engine.
//!
//! Every message starts with its fixed-parameter TLV, optionally followed by
//! array TLVs. Outbound commands must carry a fixed parameter of exactly the
//! host size. Inbound events from older firmware may carry a shorter one; the
//! view pads it with zeros to the host size, and longer ones are truncated.

pub mod ids;
pub mod tlv;

use transport::HtcTag;
use wmi::{Catalog, CatalogError, WmiConfig};

use crate::ids::{cmd, MsgDef};
use crate::tlv::{walk, TlvError, TlvWriter};

/// Tag for commands that start a power-save transition.
pub const HTC_TAG_AUTO_PM: HtcTag = HtcTag(1);
/// Tag for commands that end one.
pub const HTC_TAG_RUNTIME_PUT: HtcTag = HtcTag(2);

/// An array TLV copied out of an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Vec<u8>,
}

/// Validated event with its fixed parameter padded to the host size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlvView {
    pub id: u32,
    pub fixed: Vec<u8>,
    pub arrays: Vec<Tlv>,
}

impl TlvView {
    /// Little-endian word `index` of the fixed parameter.
    pub fn fixed_word(&self, index: usize) -> Option<u32> {
        let bytes = self.fixed.get(index * 4..index * 4 + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WmiTlvCatalog;

impl WmiTlvCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Encodes a payload for `def`: the fixed parameter (zero-padded or
    /// truncated to the host size) followed by `arrays`.
    pub fn encode(def: &MsgDef, fixed: &[u8], arrays: &[(u16, &[u8])]) -> Result<Vec<u8>, CatalogError> {
        let mut padded = vec![0u8; def.fixed_len];
        let n = fixed.len().min(def.fixed_len);
        padded[..n].copy_from_slice(&fixed[..n]);

        let mut writer = TlvWriter::new();
        let tlv_err = |err: TlvError| CatalogError::new(def.id, err.to_string());
        writer.push(def.fixed_tag, &padded).map_err(tlv_err)?;
        for (tag, value) in arrays {
            writer.push(*tag, value).map_err(tlv_err)?;
        }
        Ok(writer.finish())
    }

    /// Payload for command `id`.
    pub fn command_payload(id: u32, fixed: &[u8], arrays: &[(u16, &[u8])]) -> Result<Vec<u8>, CatalogError> {
        let def = ids::command(id).ok_or_else(|| CatalogError::new(id, "unknown command"))?;
        Self::encode(def, fixed, arrays)
    }

    /// Payload for event `id`.
    pub fn event_payload(id: u32, fixed: &[u8], arrays: &[(u16, &[u8])]) -> Result<Vec<u8>, CatalogError> {
        let def = ids::event(id).ok_or_else(|| CatalogError::new(id, "unknown event"))?;
        Self::encode(def, fixed, arrays)
    }
}

/// Engine configuration with this catalog's resume commands allow-listed.
pub fn default_config() -> WmiConfig {
    WmiConfig::default().with_resume_cmds(ids::RESUME_CMD_IDS)
}

fn parse(def: &MsgDef, payload: &[u8]) -> Result<(Vec<u8>, Vec<Tlv>), CatalogError> {
    let mut tlvs = walk(payload);
    let fixed = match tlvs.next() {
        Some(Ok(tlv)) if tlv.tag == def.fixed_tag => tlv.value,
        Some(Ok(tlv)) => {
            return Err(CatalogError::new(
                def.id,
                format!(
                    "expected fixed param tag {:#x}, found {:#x}",
                    def.fixed_tag, tlv.tag
                ),
            ))
        }
        Some(Err(err)) => return Err(CatalogError::new(def.id, err.to_string())),
        None => return Err(CatalogError::new(def.id, "missing fixed param")),
    };
    let mut arrays = Vec::new();
    for tlv in tlvs {
        let tlv = tlv.map_err(|err| CatalogError::new(def.id, err.to_string()))?;
        arrays.push(Tlv {
            tag: tlv.tag,
            value: tlv.value.to_vec(),
        });
    }
    Ok((fixed.to_vec(), arrays))
}

impl Catalog for WmiTlvCatalog {
    type View = TlvView;

    fn check_command(&self, id: u32, payload: &[u8]) -> Result<(), CatalogError> {
        let def = ids::command(id).ok_or_else(|| CatalogError::new(id, "unknown command"))?;
        let (fixed, _) = parse(def, payload)?;
        if fixed.len() != def.fixed_len {
            return Err(CatalogError::new(
                id,
                format!(
                    "fixed param is {} bytes, expected {}",
                    fixed.len(),
                    def.fixed_len
                ),
            ));
        }
        Ok(())
    }

    fn validate_and_pad(&self, id: u32, payload: &[u8]) -> Result<TlvView, CatalogError> {
        let def = ids::event(id).ok_or_else(|| CatalogError::new(id, "unknown event"))?;
        let (mut fixed, arrays) = parse(def, payload)?;
        fixed.resize(def.fixed_len, 0);
        Ok(TlvView { id, fixed, arrays })
    }

    fn id_to_name(&self, id: u32) -> &'static str {
        ids::command(id)
            .or_else(|| ids::event(id))
            .map_or("UNKNOWN", |def| def.name)
    }

    fn is_management(&self, id: u32) -> bool {
        ids::command(id)
            .or_else(|| ids::event(id))
            .is_some_and(|def| def.mgmt)
    }

    fn htc_tx_tag(&self, id: u32) -> HtcTag {
        match id {
            cmd::PDEV_SUSPEND | cmd::WOW_ENABLE => HTC_TAG_AUTO_PM,
            cmd::PDEV_RESUME | cmd::WOW_HOSTWAKEUP_FROM_SLEEP => HTC_TAG_RUNTIME_PUT,
            _ => HtcTag::NONE,
        }
    }

    fn event_table(&self) -> Vec<(u32, u32)> {
        ids::EVENT_TABLE.to_vec()
    }
}
