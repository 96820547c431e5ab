//! ROM construction: byte emission, width-checked operands and label
//! back-patching.
use smol_str::SmolStr;

use super::types::{Constant, ProtoRef, Prototype};
use super::{Program, RAM_MAX};

impl<'s> Program<'s> {
    /// Write one byte at `here`.
    ///
    /// Grows the ROM through the 64 KiB / 1 MiB / 8 MiB / 16 MiB ladder,
    /// fails on any write to an address that is already used, and records
    /// the source line that produced the byte.
    pub(crate) fn append(&mut self, byte: u8) {
        if self.is_error {
            return;
        }
        if self.here >= RAM_MAX {
            self.raise("Supported ROM space is full (16MB).");
            return;
        }
        if self.here >= self.rom.len() {
            let new_size = if self.rom.len() < 1024 * 1024 {
                1024 * 1024
            } else if self.rom.len() < RAM_MAX / 2 {
                RAM_MAX / 2
            } else {
                RAM_MAX
            };
            self.rom.resize(new_size, 0);
            self.used.resize(new_size, false);
            self.rom_line_map.resize(new_size, 0xFFFF_FFFF);
        }
        if self.used[self.here] {
            self.raise(format!(
                "Data overlap. Address 0x{:X} has already been defined.",
                self.here
            ));
            return;
        }
        self.rom_line_map[self.here] = self.source_line;
        self.rom[self.here] = byte;
        self.used[self.here] = true;
        self.here += 1;
        if self.here > self.length {
            self.length = self.here;
        }
    }

    pub(crate) fn instruction(&mut self, a: u8, b: u8) {
        self.append(a);
        self.append(b);
    }

    pub(crate) fn immediate(&mut self, op: u8, nnn: i32) {
        self.instruction(op | ((nnn >> 8) & 0xF) as u8, (nnn & 0xFF) as u8);
    }

    /// Back-patch a previously reserved two-byte slot with `0x1NNN`.
    pub(crate) fn jump(&mut self, addr: usize, dest: usize) {
        if self.is_error {
            return;
        }
        self.rom[addr] = 0x10 | ((dest >> 8) & 0xF) as u8;
        self.used[addr] = true;
        self.rom[addr + 1] = (dest & 0xFF) as u8;
        self.used[addr + 1] = true;
    }

    fn value_range(&mut self, n: i32, mask: i32) -> i32 {
        if mask == 0xF && !(0..=mask).contains(&n) {
            self.raise(format!(
                "Argument {} does not fit in 4 bits- must be in range [0,15].",
                n
            ));
        }
        if mask == 0xFF && !(-128..=mask).contains(&n) {
            self.raise(format!(
                "Argument {} does not fit in a byte- must be in range [-128,255].",
                n
            ));
        }
        if mask == 0xFFF && !(0..=mask).contains(&n) {
            self.raise(format!("Argument {} does not fit in 12 bits.", n));
        }
        if mask == 0xFFFF && !(0..=mask).contains(&n) {
            self.raise(format!("Argument {} does not fit in 16 bits.", n));
        }
        if mask == 0xFF_FFFF && !(0..=mask).contains(&n) {
            self.raise(format!("Argument {} does not fit in 24 bits.", n));
        }
        n & mask
    }

    fn value_fail(&mut self, width: &str, name: &str, undefined: bool) {
        if self.is_error {
            return;
        }
        if self.is_register(name) {
            self.raise(format!(
                "Expected {} value, but found the register {}.",
                width, name
            ));
        } else if super::tokens::is_reserved(name) {
            self.raise(format!(
                "Expected {} value, but found the keyword '{}'. Missing a token?",
                width, name
            ));
        } else if undefined {
            self.raise(format!(
                "Expected {} value, but found the undefined name '{}'.",
                width, name
            ));
        }
    }

    pub(crate) fn value_4bit(&mut self) -> i32 {
        if self.is_error {
            return 0;
        }
        let t = self.next();
        if t.is_number() {
            return self.value_range(t.num() as i32, 0xF);
        }
        let n = t.str_value().cloned().unwrap_or_default();
        if let Some(c) = self.constants.get(&n) {
            let v = c.value as i32;
            return self.value_range(v, 0xF);
        }
        self.value_fail("a 4-bit", &n, true);
        0
    }

    pub(crate) fn value_8bit(&mut self) -> i32 {
        if self.is_error {
            return 0;
        }
        let t = self.next();
        if t.is_number() {
            return self.value_range(t.num() as i32, 0xFF);
        }
        let n = t.str_value().cloned().unwrap_or_default();
        if let Some(c) = self.constants.get(&n) {
            let v = c.value as i32;
            return self.value_range(v, 0xFF);
        }
        self.value_fail("an 8-bit", &n, true);
        0
    }

    /// A 12-bit operand; an undefined name becomes a forward reference.
    pub(crate) fn value_12bit(&mut self) -> i32 {
        if self.is_error {
            return 0;
        }
        let t = self.next();
        if t.is_number() {
            return self.value_range(t.num() as i32, 0xFFF);
        }
        let n = t.str_value().cloned().unwrap_or_default();
        let (proto_line, proto_pos) = (t.line, t.pos);
        if let Some(c) = self.constants.get(&n) {
            let v = c.value as i32;
            return self.value_range(v, 0xFFF);
        }
        self.value_fail("a 12-bit", &n, false);
        if self.is_error {
            return 0;
        }
        if !self.check_name(&n, "label") {
            return 0;
        }
        self.add_proto_ref(n, proto_line, proto_pos, self.here, 12);
        0
    }

    pub(crate) fn value_16bit(&mut self, can_forward_ref: bool, offset: usize) -> i32 {
        if self.is_error {
            return 0;
        }
        let t = self.next();
        if t.is_number() {
            return self.value_range(t.num() as i32, 0xFFFF);
        }
        let n = t.str_value().cloned().unwrap_or_default();
        let (proto_line, proto_pos) = (t.line, t.pos);
        if let Some(c) = self.constants.get(&n) {
            let v = c.value as i32;
            return self.value_range(v, 0xFFFF);
        }
        self.value_fail("a 16-bit", &n, false);
        if self.is_error {
            return 0;
        }
        if !self.check_name(&n, "label") {
            return 0;
        }
        if !can_forward_ref {
            self.raise(format!(
                "The reference to '{}' may not be forward-declared.",
                n
            ));
            return 0;
        }
        self.add_proto_ref(n, proto_line, proto_pos, self.here + offset, 16);
        0
    }

    pub(crate) fn value_24bit(&mut self, can_forward_ref: bool, offset: usize) -> i32 {
        if self.is_error {
            return 0;
        }
        let t = self.next();
        if t.is_number() {
            return self.value_range(t.num() as i32, 0xFF_FFFF);
        }
        let n = t.str_value().cloned().unwrap_or_default();
        let (proto_line, proto_pos) = (t.line, t.pos);
        if let Some(c) = self.constants.get(&n) {
            let v = c.value as i32;
            return self.value_range(v, 0xFF_FFFF);
        }
        self.value_fail("a 24-bit", &n, false);
        if self.is_error {
            return 0;
        }
        if !self.check_name(&n, "label") {
            return 0;
        }
        if !can_forward_ref {
            self.raise(format!(
                "The reference to '{}' may not be forward-declared.",
                n
            ));
            return 0;
        }
        self.add_proto_ref(n, proto_line, proto_pos, self.here + offset, 24);
        0
    }

    fn add_proto_ref(&mut self, name: SmolStr, line: u32, pos: u32, addr: usize, bits: u8) {
        let proto = self.protos.entry(name).or_insert_with(|| Prototype {
            line,
            pos,
            addrs: Vec::new(),
        });
        proto.addrs.push(ProtoRef { addr, bits });
    }

    /// Constant operand for `:const`; forward references are not allowed
    /// here. The value is truncated to an integer.
    pub(crate) fn value_constant(&mut self) -> Constant {
        let t = self.next();
        if self.is_error {
            return Constant {
                value: 0.0,
                is_mutable: false,
            };
        }
        if t.is_number() {
            return Constant {
                value: (t.num() as i64) as f64,
                is_mutable: false,
            };
        }
        let n = t.str_value().cloned().unwrap_or_default();
        if let Some(c) = self.constants.get(&n) {
            return Constant {
                value: c.value,
                is_mutable: false,
            };
        }
        if self.protos.contains_key(&n) {
            self.raise(format!(
                "A constant reference to '{}' may not be forward-declared.",
                n
            ));
        }
        self.value_fail("a constant", &n, true);
        Constant {
            value: 0.0,
            is_mutable: false,
        }
    }

    /// Define a label at `here + offset` and drain its prototype, patching
    /// every recorded reference at its recorded width.
    pub(crate) fn resolve_label(&mut self, offset: usize) {
        let mut target = self.here + offset;
        let n = self.identifier("label");
        if self.is_error {
            return;
        }
        if self.constants.contains_key(&n) {
            self.raise(format!("The name '{}' has already been defined.", n));
            return;
        }
        if self.aliases.contains_key(&n) {
            self.raise(format!("The name '{}' is already used by an alias.", n));
            return;
        }
        if (target == self.start_address + 2 || target == self.start_address) && n == "main" {
            // Reclaim the reserved trampoline; the ROM starts at main.
            self.has_main = false;
            self.here = self.start_address;
            target = self.start_address;
            self.rom[self.start_address] = 0;
            self.used[self.start_address] = false;
            self.rom[self.start_address + 1] = 0;
            self.used[self.start_address + 1] = false;
        }
        self.constants.insert(
            n.clone(),
            Constant {
                value: target as f64,
                is_mutable: false,
            },
        );
        let proto = match self.protos.remove(&n) {
            Some(proto) => proto,
            None => return,
        };
        for pa in &proto.addrs {
            let a = pa.addr;
            if pa.bits == 16 && (self.rom[a] & 0xF0) == 0x60 {
                // :unpack long target
                self.rom[a + 1] = (target >> 8) as u8;
                self.rom[a + 3] = target as u8;
            } else if pa.bits == 16 {
                // i := long target, :pointer
                self.rom[a] = (target >> 8) as u8;
                self.rom[a + 1] = target as u8;
            } else if pa.bits <= 12 && (target & 0xFFF) != target {
                self.raise(format!(
                    "Value 0x{:X} for label '{}' does not fit in 12 bits.",
                    target, n
                ));
                break;
            } else if pa.bits <= 16 && (target & 0xFFFF) != target {
                self.raise(format!(
                    "Value 0x{:X} for label '{}' does not fit in 16 bits.",
                    target, n
                ));
                break;
            } else if pa.bits <= 24 && (target & 0xFF_FFFF) != target {
                self.raise(format!(
                    "Value 0x{:X} for label '{}' does not fit in 24 bits.",
                    target, n
                ));
                break;
            } else if pa.bits == 24 {
                self.rom[a] = (target >> 16) as u8;
                self.rom[a + 1] = (target >> 8) as u8;
                self.rom[a + 2] = target as u8;
            } else if (self.rom[a] & 0xF0) == 0x60 {
                // :unpack target
                self.rom[a + 1] = (self.rom[a + 1] & 0xF0) | ((target >> 8) & 0xF) as u8;
                self.rom[a + 3] = target as u8;
            } else {
                self.rom[a] = (self.rom[a] & 0xF0) | ((target >> 8) & 0xF) as u8;
                self.rom[a + 1] = target as u8;
            }
        }
    }
}
