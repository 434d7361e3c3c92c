use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PointerButtons: u8 {
        const LEFT = 1 << 0;
        const MIDDLE = 1 << 1;
        const RIGHT = 1 << 2;
        const BACK = 1 << 3;
        const FORWARD = 1 << 4;
    }
}

impl PointerButtons {
    /// Maps DOM-style button indices (0 = left, 1 = middle, 2 = right, 3 = back, 4 = forward).
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::LEFT),
            1 => Some(Self::MIDDLE),
            2 => Some(Self::RIGHT),
            3 => Some(Self::BACK),
            4 => Some(Self::FORWARD),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    KeyDown { key: String },
    KeyUp { key: String },
    PointerMove { x: f32, y: f32 },
    ButtonDown { button: i64 },
    ButtonUp { button: i64 },
    /// Focus loss releases everything that is held.
    Blur,
}

/// Frozen view of held input, handed to scripts once per frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSnapshot {
    keys: BTreeSet<String>,
    pub pointer: (f32, f32),
    pub buttons: PointerButtons,
}

impl InputSnapshot {
    pub fn is_key_down(&self, key: &str) -> bool {
        self.keys.contains(&normalize_key(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn is_button_down(&self, index: i64) -> bool {
        PointerButtons::from_index(index).is_some_and(|button| self.buttons.contains(button))
    }
}

/// Live input state, updated by host events between frames.
#[derive(Debug, Default)]
pub struct InputState {
    keys: BTreeSet<String>,
    pointer: (f32, f32),
    buttons: PointerButtons,
    events_this_frame: usize,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: InputEvent) {
        match event {
            InputEvent::KeyDown { key } => {
                self.keys.insert(normalize_key(&key));
            }
            InputEvent::KeyUp { key } => {
                self.keys.remove(&normalize_key(&key));
            }
            InputEvent::PointerMove { x, y } => {
                if x.is_finite() && y.is_finite() {
                    self.pointer = (x, y);
                }
            }
            InputEvent::ButtonDown { button } => {
                if let Some(button) = PointerButtons::from_index(button) {
                    self.buttons.insert(button);
                }
            }
            InputEvent::ButtonUp { button } => {
                if let Some(button) = PointerButtons::from_index(button) {
                    self.buttons.remove(button);
                }
            }
            InputEvent::Blur => {
                self.keys.clear();
                self.buttons = PointerButtons::empty();
            }
        }
        self.events_this_frame += 1;
    }

    pub fn snapshot(&self) -> InputSnapshot {
        InputSnapshot { keys: self.keys.clone(), pointer: self.pointer, buttons: self.buttons }
    }

    /// Returns how many events arrived since the previous call.
    pub fn take_event_count(&mut self) -> usize {
        std::mem::take(&mut self.events_this_frame)
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}
