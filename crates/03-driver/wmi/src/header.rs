//! Fixed WMI wire header.
//!
//! One little-endian 32-bit word: the command/event id in bits 0..24 and an
//! opaque platform byte in bits 24..32.

pub const WMI_HDR_LEN: usize = 4;

pub const WMI_ID_MASK: u32 = 0x00FF_FFFF;

const PLT_PRIV_SHIFT: u32 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WmiHeader {
    pub id: u32,
    pub plt_priv: u8,
}

impl WmiHeader {
    /// Header for `id`. Bits above the 24-bit id field are discarded.
    pub fn new(id: u32) -> Self {
        Self {
            id: id & WMI_ID_MASK,
            plt_priv: 0,
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        let word = (self.id & WMI_ID_MASK) | (u32::from(self.plt_priv) << PLT_PRIV_SHIFT);
        out[..WMI_HDR_LEN].copy_from_slice(&word.to_le_bytes());
    }

    /// Reads the header at the start of `frame`, if it is long enough.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let bytes: [u8; WMI_HDR_LEN] = frame.get(..WMI_HDR_LEN)?.try_into().ok()?;
        let word = u32::from_le_bytes(bytes);
        Some(Self {
            id: word & WMI_ID_MASK,
            plt_priv: (word >> PLT_PRIV_SHIFT) as u8,
        })
    }
}
