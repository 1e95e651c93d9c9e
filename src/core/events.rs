// Event Handling
// Maps terminal key events to console input for the interactive session

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What a terminal event means for the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Raw bytes to forward to the board
    Bytes(Vec<u8>),

    /// Push local changes (Ctrl-T)
    SyncPush,

    /// Leave the console (Ctrl-])
    Quit,

    /// No operation
    None,
}

/// Event handler that converts terminal events to console input
pub struct EventHandler;

impl EventHandler {
    /// Convert a crossterm event to console input
    pub fn handle(event: Event) -> ConsoleInput {
        match event {
            Event::Key(key) => Self::handle_key(key),
            Event::Paste(text) => ConsoleInput::Bytes(text.into_bytes()),
            _ => ConsoleInput::None,
        }
    }

    /// Handle keyboard events
    fn handle_key(key: KeyEvent) -> ConsoleInput {
        // Only handle key press events
        if key.kind == KeyEventKind::Release {
            return ConsoleInput::None;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char(']') | KeyCode::Char('5') => ConsoleInput::Quit,
                KeyCode::Char('t') | KeyCode::Char('T') => ConsoleInput::SyncPush,
                // Ctrl-A..Ctrl-Z map onto 0x01..0x1a (Ctrl-C interrupts, Ctrl-D soft reboots)
                KeyCode::Char(c) if c.is_ascii_alphabetic() => {
                    ConsoleInput::Bytes(vec![(c.to_ascii_lowercase() as u8) - b'a' + 1])
                }
                _ => ConsoleInput::None,
            };
        }

        match key.code {
            KeyCode::Char(c) => {
                let mut buf = [0u8; 4];
                ConsoleInput::Bytes(c.encode_utf8(&mut buf).as_bytes().to_vec())
            }
            KeyCode::Enter => ConsoleInput::Bytes(b"\r".to_vec()),
            KeyCode::Backspace => ConsoleInput::Bytes(vec![0x7f]),
            KeyCode::Tab => ConsoleInput::Bytes(b"\t".to_vec()),
            KeyCode::Esc => ConsoleInput::Bytes(vec![0x1b]),
            KeyCode::Up => ConsoleInput::Bytes(b"\x1b[A".to_vec()),
            KeyCode::Down => ConsoleInput::Bytes(b"\x1b[B".to_vec()),
            KeyCode::Right => ConsoleInput::Bytes(b"\x1b[C".to_vec()),
            KeyCode::Left => ConsoleInput::Bytes(b"\x1b[D".to_vec()),
            KeyCode::Home => ConsoleInput::Bytes(b"\x1b[H".to_vec()),
            KeyCode::End => ConsoleInput::Bytes(b"\x1b[F".to_vec()),
            KeyCode::Delete => ConsoleInput::Bytes(b"\x1b[3~".to_vec()),
            _ => ConsoleInput::None,
        }
    }
}
