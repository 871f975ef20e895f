use arrayvec::ArrayVec;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use tracing::trace;

pub const FRAME_LEN: usize = 3;
pub const MAX_COMMAND_LEN: usize = 3;

// Outbound opcodes
pub const RESET_BYTE: u8 = 0x77;
pub const KEEP_ALIVE_BYTE: u8 = 0x11;
pub const BUTTON_PREFIX: u8 = 0xFF;

// Inbound codes
pub const FAULT_CODE_MIN: u16 = 1;
pub const FAULT_CODE_MAX: u16 = 5;
pub const CODE_CONFIG_ENTERED: u16 = 10;
pub const CODE_READY: u16 = 11;
pub const CODE_PRESET_P1_REACHED: u16 = 12;
pub const CODE_PRESET_P2_REACHED: u16 = 13;
pub const CODE_PRESET_P3_REACHED: u16 = 14;
pub const HEIGHT_MIN: u16 = 400;
pub const HEIGHT_MAX: u16 = 2000;
pub const CODE_IDLE: u16 = 0x5555;
pub const CODE_SLEEP: u16 = 0x1111;

pub type CommandBytes = Vec<u8, MAX_COMMAND_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeskButton {
    #[default]
    None,
    P1,
    P2,
    P3,
    Up,
    Down,
    M,
}

impl DeskButton {
    pub const ALL: [DeskButton; 7] = [
        DeskButton::None,
        DeskButton::P1,
        DeskButton::P2,
        DeskButton::P3,
        DeskButton::Up,
        DeskButton::Down,
        DeskButton::M,
    ];

    pub const PRESETS: [DeskButton; 3] = [DeskButton::P1, DeskButton::P2, DeskButton::P3];

    /// Numeric button code used by the controller (`None` has no code and maps to 0).
    pub const fn code(self) -> u8 {
        match self {
            DeskButton::None => 0,
            DeskButton::P1 => 1,
            DeskButton::P2 => 2,
            DeskButton::P3 => 3,
            DeskButton::Up => 4,
            DeskButton::Down => 5,
            DeskButton::M => 6,
        }
    }

    /// Wire bit-mask of the button inside a button-press command.
    pub const fn bit(self) -> u8 {
        match self {
            DeskButton::None => 0b0000_0000,
            DeskButton::P1 => 0b0010_0000,
            DeskButton::P2 => 0b0001_0000,
            DeskButton::P3 => 0b0000_1000,
            DeskButton::Up => 0b0000_0100,
            DeskButton::Down => 0b0000_0010,
            DeskButton::M => 0b0000_0001,
        }
    }

    pub const fn is_preset(self) -> bool {
        matches!(self, DeskButton::P1 | DeskButton::P2 | DeskButton::P3)
    }

    pub fn name(self) -> &'static str {
        match self {
            DeskButton::None => "none",
            DeskButton::P1 => "p1",
            DeskButton::P2 => "p2",
            DeskButton::P3 => "p3",
            DeskButton::Up => "up",
            DeskButton::Down => "down",
            DeskButton::M => "m",
        }
    }
}

// The bit table must agree with the controller's `1 << (6 - code)` layout.
const_assert_eq!(DeskButton::P1.bit(), 1 << (6 - DeskButton::P1.code()));
const_assert_eq!(DeskButton::P2.bit(), 1 << (6 - DeskButton::P2.code()));
const_assert_eq!(DeskButton::P3.bit(), 1 << (6 - DeskButton::P3.code()));
const_assert_eq!(DeskButton::Up.bit(), 1 << (6 - DeskButton::Up.code()));
const_assert_eq!(DeskButton::Down.bit(), 1 << (6 - DeskButton::Down.code()));
const_assert_eq!(DeskButton::M.bit(), 1 << (6 - DeskButton::M.code()));

impl core::fmt::Display for DeskButton {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl core::str::FromStr for DeskButton {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        DeskButton::ALL
            .iter()
            .copied()
            .find(|button| button.name() == lowered)
            .ok_or(ProtocolError::UnknownButton)
    }
}

/// Logical commands sent to the motor controller bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Reset,
    KeepAlive,
    PressButton(DeskButton),
}

impl Command {
    /// Encode into the outbound byte sequence. A button press duplicates the
    /// bit-mask so the bridge can reject single-bit errors.
    pub fn encode(&self) -> CommandBytes {
        let mut bytes = CommandBytes::new();
        // Every encoding fits in MAX_COMMAND_LEN, so the pushes cannot fail.
        match self {
            Command::Reset => {
                let _ = bytes.push(RESET_BYTE);
            }
            Command::KeepAlive => {
                let _ = bytes.push(KEEP_ALIVE_BYTE);
            }
            Command::PressButton(button) => {
                let _ = bytes.extend_from_slice(&[BUTTON_PREFIX, button.bit(), button.bit()]);
            }
        }
        bytes
    }
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Command::Reset => write!(f, "reset"),
            Command::KeepAlive => write!(f, "keep-alive"),
            Command::PressButton(button) => write!(f, "press({})", button),
        }
    }
}

/// Motor and electrical faults reported by codes 1 through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeskFault {
    Overload,
    Overheat,
    Electrical(u8),
}

impl DeskFault {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(DeskFault::Overload),
            2 => Some(DeskFault::Overheat),
            3..=5 => Some(DeskFault::Electrical(code as u8)),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            DeskFault::Overload => 1,
            DeskFault::Overheat => 2,
            DeskFault::Electrical(code) => u16::from(code),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DeskFault::Overload => "motor overload",
            DeskFault::Overheat => "motor temperature above normal",
            DeskFault::Electrical(_) => "unusual electrical problem",
        }
    }
}

/// Decoded 16-bit value classified by the ranges the controller uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCode {
    Fault(DeskFault),
    ConfigEntered,
    Ready,
    PresetReached(DeskButton),
    Height(u16),
    Idle,
    Sleep,
    Unknown(u16),
}

impl InboundCode {
    pub fn classify(code: u16) -> Self {
        match code {
            FAULT_CODE_MIN..=FAULT_CODE_MAX => {
                DeskFault::from_code(code).map_or(InboundCode::Unknown(code), InboundCode::Fault)
            }
            CODE_CONFIG_ENTERED => InboundCode::ConfigEntered,
            CODE_READY => InboundCode::Ready,
            CODE_PRESET_P1_REACHED => InboundCode::PresetReached(DeskButton::P1),
            CODE_PRESET_P2_REACHED => InboundCode::PresetReached(DeskButton::P2),
            CODE_PRESET_P3_REACHED => InboundCode::PresetReached(DeskButton::P3),
            HEIGHT_MIN..=HEIGHT_MAX => InboundCode::Height(code),
            CODE_IDLE => InboundCode::Idle,
            CODE_SLEEP => InboundCode::Sleep,
            _ => InboundCode::Unknown(code),
        }
    }
}

/// Sliding three-byte window that finds frames by checksum alignment.
///
/// A frame is `[hi, lo, hi + lo]` (mod 256). On a mismatch the window slides
/// by one byte, so the decoder resynchronizes after torn frames without
/// dropping anything.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    window: ArrayVec<u8, FRAME_LEN>,
    frames_decoded: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_byte(&mut self, byte: u8) -> Option<u16> {
        if self.window.is_full() {
            self.window.remove(0);
        }
        self.window.push(byte);

        if !self.window.is_full() {
            return None;
        }

        let (hi, lo, checksum) = (self.window[0], self.window[1], self.window[2]);
        if hi.wrapping_add(lo) == checksum {
            self.window.clear();
            self.frames_decoded = self.frames_decoded.wrapping_add(1);
            Some((u16::from(hi) << 8) | u16::from(lo))
        } else {
            trace!("checksum mismatch in window {:02x?}", self.window.as_slice());
            None
        }
    }

    /// Feed a chunk of bytes, yielding every frame found along the way.
    pub fn decode<'a>(&'a mut self, bytes: &'a [u8]) -> impl Iterator<Item = u16> + 'a {
        bytes.iter().filter_map(move |&byte| self.push_byte(byte))
    }

    pub fn fill(&self) -> usize {
        self.window.len()
    }

    pub fn frames_decoded(&self) -> u32 {
        self.frames_decoded
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// Encode a 16-bit value the way the controller frames it. Used by tests and
/// tooling that stand in for the controller.
pub fn encode_frame(value: u16) -> [u8; FRAME_LEN] {
    let [hi, lo] = value.to_be_bytes();
    [hi, lo, hi.wrapping_add(lo)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    UnknownButton,
    NotAPreset,
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::UnknownButton => write!(f, "Unknown button (expected none, p1, p2, p3, up, down or m)"),
            ProtocolError::NotAPreset => write!(f, "Button is not a preset (expected p1, p2 or p3)"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Parse a button name that must name one of the three presets.
pub fn parse_preset(name: &str) -> Result<DeskButton, ProtocolError> {
    let button: DeskButton = name.parse()?;
    if button.is_preset() {
        Ok(button)
    } else {
        Err(ProtocolError::NotAPreset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_triples_emit_exactly_once() {
        for hi in [0u8, 1, 0x11, 0x55, 0x7f, 0xff] {
            for lo in [0u8, 0x0b, 0x55, 0x80, 0xff] {
                let mut decoder = FrameDecoder::new();
                let emitted: std::vec::Vec<u16> = decoder.decode(&encode_frame(u16::from_be_bytes([hi, lo]))).collect();
                assert_eq!(emitted, vec![(u16::from(hi) << 8) | u16::from(lo)]);
                assert_eq!(decoder.fill(), 0);
            }
        }
    }

    #[test]
    fn test_bad_checksum_emits_nothing_and_resyncs() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push_byte(0x01), None);
        assert_eq!(decoder.push_byte(0xf4), None);
        assert_eq!(decoder.push_byte(0x00), None); // should have been 0xf5
        assert_eq!(decoder.fill(), FRAME_LEN);

        let height = encode_frame(450);
        let frames: std::vec::Vec<u16> = decoder.decode(&height).collect();
        assert_eq!(frames, vec![450]);
    }

    #[test]
    fn test_resync_after_torn_frame() {
        let mut decoder = FrameDecoder::new();
        // Tail end of a frame whose head was lost, followed by two whole frames.
        let mut stream = std::vec::Vec::new();
        stream.extend_from_slice(&[0xc2]);
        stream.extend_from_slice(&encode_frame(CODE_READY));
        stream.extend_from_slice(&encode_frame(CODE_IDLE));

        let frames: std::vec::Vec<u16> = decoder.decode(&stream).collect();
        assert_eq!(frames, vec![CODE_READY, CODE_IDLE]);
        assert_eq!(decoder.frames_decoded(), 2);
    }

    #[test]
    fn test_checksum_wraps_modulo_256() {
        let mut decoder = FrameDecoder::new();
        let frames: std::vec::Vec<u16> = decoder.decode(&[0x55, 0x55, 0xaa]).collect();
        assert_eq!(frames, vec![CODE_IDLE]);

        let frames: std::vec::Vec<u16> = decoder.decode(&[0x07, 0xd0, 0xd7]).collect();
        assert_eq!(frames, vec![2000]);
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(Command::Reset.encode().as_slice(), &[0x77]);
        assert_eq!(Command::KeepAlive.encode().as_slice(), &[0x11]);
        assert_eq!(Command::PressButton(DeskButton::Up).encode().as_slice(), &[0xff, 0b0000100, 0b0000100]);
        assert_eq!(Command::PressButton(DeskButton::None).encode().as_slice(), &[0xff, 0, 0]);
        assert_eq!(Command::PressButton(DeskButton::M).encode().as_slice(), &[0xff, 1, 1]);
        assert_eq!(Command::PressButton(DeskButton::P1).encode().as_slice(), &[0xff, 0x20, 0x20]);
    }

    #[test]
    fn test_button_table_matches_codes() {
        for button in DeskButton::ALL.iter().skip(1) {
            assert_eq!(button.bit(), 1 << (6 - button.code()));
        }
        assert_eq!(DeskButton::None.bit(), 0);
        assert!(DeskButton::PRESETS.iter().all(|b| b.is_preset()));
        assert!(!DeskButton::Up.is_preset());
        assert!(!DeskButton::M.is_preset());
        assert!(!DeskButton::None.is_preset());
    }

    #[test]
    fn test_button_parsing() {
        assert_eq!("P2".parse::<DeskButton>(), Ok(DeskButton::P2));
        assert_eq!(" down ".parse::<DeskButton>(), Ok(DeskButton::Down));
        assert_eq!("sideways".parse::<DeskButton>(), Err(ProtocolError::UnknownButton));
        assert_eq!(parse_preset("p3"), Ok(DeskButton::P3));
        assert_eq!(parse_preset("up"), Err(ProtocolError::NotAPreset));
    }

    #[test]
    fn test_code_classification() {
        assert_eq!(InboundCode::classify(1), InboundCode::Fault(DeskFault::Overload));
        assert_eq!(InboundCode::classify(4), InboundCode::Fault(DeskFault::Electrical(4)));
        assert_eq!(InboundCode::classify(10), InboundCode::ConfigEntered);
        assert_eq!(InboundCode::classify(11), InboundCode::Ready);
        assert_eq!(InboundCode::classify(13), InboundCode::PresetReached(DeskButton::P2));
        assert_eq!(InboundCode::classify(400), InboundCode::Height(400));
        assert_eq!(InboundCode::classify(2000), InboundCode::Height(2000));
        assert_eq!(InboundCode::classify(2001), InboundCode::Unknown(2001));
        assert_eq!(InboundCode::classify(0), InboundCode::Unknown(0));
        assert_eq!(InboundCode::classify(0x5555), InboundCode::Idle);
        assert_eq!(InboundCode::classify(0x1111), InboundCode::Sleep);
    }

    #[test]
    fn test_fault_descriptions() {
        assert_eq!(DeskFault::from_code(2).map(DeskFault::description), Some("motor temperature above normal"));
        assert_eq!(DeskFault::from_code(6), None);
        assert_eq!(DeskFault::Electrical(5).code(), 5);
    }
}
