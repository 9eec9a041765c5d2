//! Register layouts of the Classic charge controller and the decoder that turns raw
//! holding registers into named fields.
//!
//! Every block is described by a [`BlockLayout`]: the start address, the number of
//! registers requested and the ordered list of [`Field`]s packed into them. The
//! controller stores 16-bit values big-endian and 32-bit values with the least
//! significant word first.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Errors raised while decoding a register block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The device returned a different number of registers than the layout needs.
    #[error("Block {address}: expected {expected} registers, got {actual}")]
    UnexpectedLength {
        address: u16,
        expected: usize,
        actual: usize,
    },
    /// A field ran past the end of the buffer.
    #[error("Block {address}: field '{field}' needs {needed} bytes, only {left} left")]
    ShortBuffer {
        address: u16,
        field: &'static str,
        needed: usize,
        left: usize,
    },
}

/// MODBUS unit id the Classic answers on.
pub const DEFAULT_UNIT_ID: u8 = 10;

/// Registers read to check that a fresh connection is alive.
pub const PROBE_REG_ADDR: u16 = 4163;
pub const PROBE_REG_QUAN: u16 = 2;

/// Storage width and signedness of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    /// Reserved bytes, consumed without output.
    Skip(usize),
}

impl Width {
    pub const fn size(&self) -> usize {
        match self {
            Width::U8 | Width::I8 => 1,
            Width::U16 | Width::I16 => 2,
            Width::U32 | Width::I32 => 4,
            Width::Skip(bytes) => *bytes,
        }
    }
}

/// One entry of a [`BlockLayout`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub width: Width,
    /// Fixed-point divisor; the public value is `raw / scale`.
    pub scale: Option<f64>,
    /// Added after scaling.
    pub offset: Option<f64>,
}

impl Field {
    const fn new(name: &'static str, width: Width) -> Self {
        Self {
            name,
            width,
            scale: None,
            offset: None,
        }
    }

    pub const fn u8(name: &'static str) -> Self {
        Self::new(name, Width::U8)
    }

    pub const fn i8(name: &'static str) -> Self {
        Self::new(name, Width::I8)
    }

    pub const fn u16(name: &'static str) -> Self {
        Self::new(name, Width::U16)
    }

    pub const fn i16(name: &'static str) -> Self {
        Self::new(name, Width::I16)
    }

    pub const fn u32(name: &'static str) -> Self {
        Self::new(name, Width::U32)
    }

    pub const fn i32(name: &'static str) -> Self {
        Self::new(name, Width::I32)
    }

    pub const fn skip(bytes: usize) -> Self {
        Self::new("", Width::Skip(bytes))
    }

    pub const fn scaled(mut self, divisor: f64) -> Self {
        self.scale = Some(divisor);
        self
    }

    pub const fn offset(mut self, offset: f64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub const fn size(&self) -> usize {
        self.width.size()
    }

    fn value(&self, bytes: &[u8]) -> Option<FieldValue> {
        let raw: i64 = match self.width {
            Width::U8 => bytes[0] as i64,
            Width::I8 => bytes[0] as i8 as i64,
            Width::U16 => u16::from_be_bytes([bytes[0], bytes[1]]) as i64,
            Width::I16 => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
            // low word first
            Width::U32 => u32::from_be_bytes([bytes[2], bytes[3], bytes[0], bytes[1]]) as i64,
            Width::I32 => i32::from_be_bytes([bytes[2], bytes[3], bytes[0], bytes[1]]) as i64,
            Width::Skip(_) => return None,
        };
        Some(match (self.scale, self.offset) {
            (None, None) => FieldValue::Int(raw),
            (scale, offset) => {
                FieldValue::Float(raw as f64 / scale.unwrap_or(1.0) + offset.unwrap_or(0.0))
            }
        })
    }
}

/// A contiguous run of holding registers and the fields packed into it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockLayout {
    pub address: u16,
    pub quantity: u16,
    pub fields: &'static [Field],
}

impl BlockLayout {
    /// Bytes consumed by all fields, skips included.
    pub const fn byte_len(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < self.fields.len() {
            total += self.fields[i].size();
            i += 1;
        }
        total
    }
}

pub const STATUS_BLOCK: BlockLayout = BlockLayout {
    address: 4100,
    quantity: 44,
    fields: &[
        Field::u8("PCB"),                                // 4101 MSB
        Field::u8("Type"),                               // 4101 LSB
        Field::u16("Year"),                              // 4102
        Field::u8("Month"),                              // 4103 MSB
        Field::u8("Day"),                                // 4103 LSB
        Field::u16("InfoFlagBits3"),                     // 4104
        Field::skip(2),                                  // 4105
        Field::u8("mac_1"),                              // 4106
        Field::u8("mac_0"),                              //
        Field::u8("mac_3"),                              // 4107
        Field::u8("mac_2"),                              //
        Field::u8("mac_5"),                              // 4108
        Field::u8("mac_4"),                              //
        Field::skip(4),                                  // 4109, 4110
        Field::u32("unitID"),                            // 4111, 4112
        Field::u16("StatusRoll"),                        // 4113
        Field::u16("RsetTmms"),                          // 4114
        Field::i16("BatVoltage").scaled(10.0),           // 4115
        Field::u16("PVVoltage").scaled(10.0),            // 4116
        Field::u16("BatCurrent").scaled(10.0),           // 4117
        Field::u16("EnergyToday").scaled(10.0),          // 4118
        Field::u16("Power").scaled(1.0),                 // 4119
        Field::u8("ChargeState"),                        // 4120 MSB
        Field::u8("State"),                              // 4120 LSB
        Field::u16("PVCurrent").scaled(10.0),            // 4121
        Field::u16("lastVOC").scaled(10.0),              // 4122
        Field::u16("HighestVinputLog"),                  // 4123
        Field::u16("MatchPointShadow"),                  // 4124
        Field::u16("AmpHours"),                          // 4125
        Field::u32("TotalEnergy").scaled(10.0),          // 4126, 4127
        Field::u32("LifetimeAmpHours"),                  // 4128, 4129
        Field::u32("InfoFlagsBits"),                     // 4130, 4131
        Field::i16("BatTemperature").scaled(10.0),       // 4132
        Field::i16("FETTemperature").scaled(10.0),       // 4133
        Field::i16("PCBTemperature").scaled(10.0),       // 4134
        Field::u16("NiteMinutesNoPwr"),                  // 4135
        Field::u16("MinuteLogIntervalSec"),              // 4136
        Field::u16("ModbusPortRegister"),                // 4137
        Field::u16("FloatTimeTodaySeconds"),             // 4138
        Field::u16("AbsorbTime"),                        // 4139
        Field::u16("Reserved1"),                         // 4140
        Field::u16("PwmReadOnly"),                       // 4141
        Field::u16("ReasonForReset"),                    // 4142
        Field::u16("EqualizeTime"),                      // 4143
        Field::skip(2),                                  // 4144
    ],
};

pub const WHIZBANG_BLOCK: BlockLayout = BlockLayout {
    address: 4360,
    quantity: 22,
    fields: &[
        Field::u16("WbangJrCmdS"),                       // 4361
        Field::i16("WizBangJrRawCurrent"),               // 4362
        Field::skip(4),                                  // 4363, 4364
        Field::u32("WbJrAmpHourPositive"),               // 4365, 4366
        Field::i32("WbJrAmpHourNegative"),               // 4367, 4368
        Field::i32("WbJrAmpHourNet"),                    // 4369, 4370
        Field::i16("WhizbangBatCurrent").scaled(10.0),   // 4371
        Field::i8("WizBangCRC"),                         // 4372 MSB
        Field::i8("ShuntTemperature").offset(-50.0),     // 4372 LSB
        Field::u16("SOC"),                               // 4373
        Field::skip(6),                                  // 4374 - 4376
        Field::u16("RemainingAmpHours"),                 // 4377
        Field::skip(6),                                  // 4378 - 4380
        Field::u16("TotalAmpHours"),                     // 4381
        Field::skip(2),                                  // 4382
    ],
};

pub const MPPT_BLOCK: BlockLayout = BlockLayout {
    address: 4163,
    quantity: 2,
    fields: &[
        Field::u16("MPPTMode"),                          // 4164
        Field::i8("Aux1Function"),                       // 4165 MSB
        Field::i8("Aux2Function"),                       // 4165 LSB
    ],
};

pub const NAME_BLOCK: BlockLayout = BlockLayout {
    address: 4209,
    quantity: 4,
    fields: &[
        Field::u8("Name0"),                              // 4210
        Field::u8("Name1"),
        Field::u8("Name2"),                              // 4211
        Field::u8("Name3"),
        Field::u8("Name4"),                              // 4212
        Field::u8("Name5"),
        Field::u8("Name6"),                              // 4213
        Field::u8("Name7"),
    ],
};

pub const CLOCK_BLOCK: BlockLayout = BlockLayout {
    address: 4213,
    quantity: 6,
    fields: &[
        Field::u32("CTIME0"),                            // 4214, 4215
        Field::u32("CTIME1"),                            // 4216, 4217
        Field::u32("CTIME2"),                            // 4218, 4219
    ],
};

pub const BATTERY_BLOCK: BlockLayout = BlockLayout {
    address: 4243,
    quantity: 32,
    fields: &[
        Field::i16("VbattRegSetPTmpComp").scaled(10.0),  // 4244
        Field::u16("nominalBatteryVoltage"),             // 4245
        Field::i16("endingAmps").scaled(10.0),           // 4246
        Field::skip(56),                                 // 4247 - 4274
        Field::u16("ReasonForResting"),                  // 4275
    ],
};

pub const VERSION_BLOCK: BlockLayout = BlockLayout {
    address: 16386,
    quantity: 4,
    fields: &[
        Field::u32("app_rev"),                           // 16387, 16388
        Field::u32("net_rev"),                           // 16389, 16390
    ],
};

/// All blocks read per fetch cycle, in read order.
pub const BLOCKS: [BlockLayout; 7] = [
    STATUS_BLOCK,
    WHIZBANG_BLOCK,
    MPPT_BLOCK,
    NAME_BLOCK,
    CLOCK_BLOCK,
    BATTERY_BLOCK,
    VERSION_BLOCK,
];

const _: () = {
    let mut i = 0;
    while i < BLOCKS.len() {
        assert!(
            BLOCKS[i].byte_len() == BLOCKS[i].quantity as usize * 2,
            "register layout does not match the requested register count"
        );
        i += 1;
    }
};

/// Looks up the layout read from `address`.
pub fn layout_for(address: u16) -> Option<&'static BlockLayout> {
    BLOCKS.iter().find(|layout| layout.address == address)
}

/// A decoded or derived value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Named fields of one fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodedReading(BTreeMap<&'static str, FieldValue>);

impl DecodedReading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, value: FieldValue) {
        self.0.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Integer fields only; scaled fields are floats.
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric fields as floats.
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            FieldValue::Int(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Merges `other` into `self`; fields of `other` win.
    pub fn merge(&mut self, other: DecodedReading) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (*name, value))
    }
}

/// Decodes one register block according to `layout`.
pub fn decode(layout: &BlockLayout, registers: &[u16]) -> Result<DecodedReading, Error> {
    if registers.len() != layout.quantity as usize {
        return Err(Error::UnexpectedLength {
            address: layout.address,
            expected: layout.quantity as usize,
            actual: registers.len(),
        });
    }
    let bytes: Vec<u8> = registers.iter().flat_map(|reg| reg.to_be_bytes()).collect();
    let mut rest = bytes.as_slice();
    let mut decoded = DecodedReading::new();
    for field in layout.fields {
        let (head, tail) = rest
            .split_at_checked(field.size())
            .ok_or(Error::ShortBuffer {
                address: layout.address,
                field: field.name,
                needed: field.size(),
                left: rest.len(),
            })?;
        if let Some(value) = field.value(head) {
            decoded.insert(field.name, value);
        }
        rest = tail;
    }
    Ok(decoded)
}
