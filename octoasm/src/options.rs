//! Emulator configuration options.
//!
//! This is the `options` object carried by Octo cartridges and external
//! JSON files. The decoder is deliberately lenient: unknown fields are
//! ignored and malformed values fall back to their defaults, so a ROM with
//! a sloppy options block still loads.
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    Octo,
    Vip,
    Dream6800,
    Eti660,
    Schip,
    Fish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchInputMode {
    None,
    Swipe,
    Seg16,
    Seg16Fill,
    Gamepad,
    Vip,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulationOptions {
    pub tickrate: u32,
    pub max_size: u32,
    pub screen_rotation: u32,
    pub font_style: FontStyle,
    pub touch_input_mode: TouchInputMode,

    pub background_color: String,
    pub fill_color: String,
    pub fill_color2: String,
    pub blend_color: String,
    pub buzz_color: String,
    pub quiet_color: String,

    pub shift_quirks: bool,
    pub load_store_quirks: bool,
    pub jump_quirks: bool,
    pub logic_quirks: bool,
    pub clip_quirks: bool,
    pub v_blank_quirks: bool,
}

impl Default for EmulationOptions {
    fn default() -> Self {
        Self {
            tickrate: 20,
            max_size: 3584,
            screen_rotation: 0,
            font_style: FontStyle::Octo,
            touch_input_mode: TouchInputMode::None,
            background_color: "#996600".to_string(),
            fill_color: "#FFCC00".to_string(),
            fill_color2: "#FF6600".to_string(),
            blend_color: "#662200".to_string(),
            buzz_color: "#FFAA00".to_string(),
            quiet_color: "#000000".to_string(),
            shift_quirks: false,
            load_store_quirks: false,
            jump_quirks: false,
            logic_quirks: false,
            clip_quirks: false,
            v_blank_quirks: false,
        }
    }
}

impl EmulationOptions {
    /// Decode an options JSON document, keeping defaults for anything
    /// missing, unknown or malformed.
    pub fn from_json(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self::default(),
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let mut options = Self::default();
        let object = match value.as_object() {
            Some(object) => object,
            None => return options,
        };

        if let Some(n) = object.get("tickrate").and_then(Value::as_u64) {
            options.tickrate = n as u32;
        }
        if let Some(n) = object.get("maxSize").and_then(Value::as_u64) {
            if matches!(n, 3232 | 3583 | 3584 | 65024) {
                options.max_size = n as u32;
            }
        }
        if let Some(n) = object.get("screenRotation").and_then(Value::as_u64) {
            if matches!(n, 0 | 90 | 180 | 270) {
                options.screen_rotation = n as u32;
            }
        }
        if let Some(s) = object.get("fontStyle").and_then(Value::as_str) {
            options.font_style = match s {
                "octo" => FontStyle::Octo,
                "vip" => FontStyle::Vip,
                "dream6800" => FontStyle::Dream6800,
                "eti660" => FontStyle::Eti660,
                "schip" => FontStyle::Schip,
                "fish" => FontStyle::Fish,
                _ => options.font_style,
            };
        }
        if let Some(s) = object.get("touchInputMode").and_then(Value::as_str) {
            options.touch_input_mode = match s {
                "none" => TouchInputMode::None,
                "swipe" => TouchInputMode::Swipe,
                "seg16" => TouchInputMode::Seg16,
                "seg16fill" => TouchInputMode::Seg16Fill,
                "gamepad" => TouchInputMode::Gamepad,
                "vip" => TouchInputMode::Vip,
                _ => options.touch_input_mode,
            };
        }

        let colors: [(&str, fn(&mut Self) -> &mut String); 6] = [
            ("backgroundColor", |o| &mut o.background_color),
            ("fillColor", |o| &mut o.fill_color),
            ("fillColor2", |o| &mut o.fill_color2),
            ("blendColor", |o| &mut o.blend_color),
            ("buzzColor", |o| &mut o.buzz_color),
            ("quietColor", |o| &mut o.quiet_color),
        ];
        for (key, field) in colors {
            if let Some(s) = object.get(key).and_then(Value::as_str) {
                *field(&mut options) = s.to_string();
            }
        }

        let quirks: [(&str, fn(&mut Self) -> &mut bool); 6] = [
            ("shiftQuirks", |o| &mut o.shift_quirks),
            ("loadStoreQuirks", |o| &mut o.load_store_quirks),
            ("jumpQuirks", |o| &mut o.jump_quirks),
            ("logicQuirks", |o| &mut o.logic_quirks),
            ("clipQuirks", |o| &mut o.clip_quirks),
            ("vBlankQuirks", |o| &mut o.v_blank_quirks),
        ];
        for (key, field) in quirks {
            if let Some(b) = object.get(key).and_then(Value::as_bool) {
                *field(&mut options) = b;
            }
        }

        options
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_on_garbage() {
        assert_eq!(EmulationOptions::from_json("not json"), EmulationOptions::default());
        assert_eq!(EmulationOptions::from_json("[1,2]"), EmulationOptions::default());
    }

    #[test]
    fn test_unknown_and_malformed_fields() {
        let options = EmulationOptions::from_json(
            r#"{"tickrate": 200, "maxSize": 1234, "screenRotation": 90,
                "fontStyle": "nope", "mysteryField": true, "shiftQuirks": true}"#,
        );
        assert_eq!(options.tickrate, 200);
        // 1234 is not an allowed maxSize; the default survives.
        assert_eq!(options.max_size, 3584);
        assert_eq!(options.screen_rotation, 90);
        assert_eq!(options.font_style, FontStyle::Octo);
        assert!(options.shift_quirks);
    }

    #[test]
    fn test_json_round_trip() {
        let mut options = EmulationOptions::default();
        options.tickrate = 100;
        options.touch_input_mode = TouchInputMode::Gamepad;
        options.v_blank_quirks = true;
        let text = options.to_json();
        assert_eq!(EmulationOptions::from_json(&text), options);
    }
}
