//! Baudot/Murray (ITA2) decoding of 5-bit UART characters.

use crate::decoders::DecodedEvent;

/// Code that switches to the letters table.
pub const LETTERS_SHIFT: u8 = 31;
/// Code that switches to the figures table.
pub const FIGURES_SHIFT: u8 = 27;

const LETTERS: [char; 32] = [
    '␀', 'T', '␍', 'O', '␠', 'H', 'N', 'M', '␊', 'L', 'R', 'G', 'I', 'P', 'C', 'V', 'E', 'Z', 'D',
    'B', 'S', 'Y', 'F', 'X', 'A', 'W', 'J', '⑨', 'U', 'Q', 'K', 'Ⓐ',
];

const FIGURES: [char; 32] = [
    '␀', '5', '␍', '9', '␠', '#', ',', '.', '␊', ')', '4', '&', '8', '0', ':', ';', '3', '"', '$',
    '?', '\'', '6', '!', '/', '-', '2', '␇', '⑨', '7', '1', '(', 'Ⓐ',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shift {
    #[default]
    Letters,
    Figures,
}

/// Stateful decoder; the shift persists across calls.
#[derive(Debug, Clone, Default)]
pub struct BaudotDecoder {
    shift: Shift,
}

impl BaudotDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shift(&self) -> Shift {
        self.shift
    }

    /// Decode one code. Shift codes change the table and are shown as
    /// their own symbol.
    pub fn push(&mut self, code: u8) -> char {
        let code = code & 0x1F;
        match code {
            LETTERS_SHIFT => self.shift = Shift::Letters,
            FIGURES_SHIFT => self.shift = Shift::Figures,
            _ => {}
        }
        let table = match self.shift {
            Shift::Letters => &LETTERS,
            Shift::Figures => &FIGURES,
        };
        table[usize::from(code)]
    }
}

/// Decode a run of 5-bit codes starting in letters shift.
pub fn decode_baudot(codes: &[u8]) -> String {
    let mut decoder = BaudotDecoder::new();
    codes.iter().map(|&code| decoder.push(code)).collect()
}

/// Decode the data bytes of a UART event list as Baudot.
pub fn decode_baudot_events(events: &[DecodedEvent]) -> String {
    let codes: Vec<u8> = events
        .iter()
        .filter_map(|event| match event {
            DecodedEvent::DataByte { value, .. } => Some(*value),
            _ => None,
        })
        .collect();
    decode_baudot(&codes)
}
