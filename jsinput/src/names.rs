use {
    std::{
        fmt
    }
};

/// The label used for every type code which has no name assigned.
pub const UNKNOWN: &str = "?";

/// The first key code which the kernel uses for "miscellaneous" buttons;
/// the button name table is indexed relative to this.
pub const BTN_MISC: u16 = 0x100;

/// Number of entries in the kernel's axis map (`ABS_CNT`).
pub const AXIS_MAP_LEN: usize = 0x40;

/// Number of entries in the kernel's button map (`KEY_MAX - BTN_MISC + 1`).
pub const BUTTON_MAP_LEN: usize = 0x200;

// Indexed by the `ABS_*` code.
static AXIS_NAMES: [&str; AXIS_MAP_LEN] = [
    "X", "Y", "Z", "Rx", "Ry", "Rz", "Throttle", "Rudder",
    "Wheel", "Gas", "Brake", "?", "?", "?", "?", "?",
    "Hat0X", "Hat0Y", "Hat1X", "Hat1Y", "Hat2X", "Hat2Y", "Hat3X", "Hat3Y",
    "?", "?", "?", "?", "?", "?", "?", "?",
    "?", "?", "?", "?", "?", "?", "?", "?",
    "?", "?", "?", "?", "?", "?", "?", "?",
    "?", "?", "?", "?", "?", "?", "?", "?",
    "?", "?", "?", "?", "?", "?", "?", "?"
];

// Indexed by `code - BTN_MISC`; anything past the end is unnamed.
static BUTTON_NAMES: [&str; 0x52] = [
    "Btn0", "Btn1", "Btn2", "Btn3", "Btn4", "Btn5", "Btn6", "Btn7",
    "Btn8", "Btn9", "?", "?", "?", "?", "?", "?",
    "LeftBtn", "RightBtn", "MiddleBtn", "SideBtn", "ExtraBtn", "ForwardBtn", "BackBtn", "TaskBtn",
    "?", "?", "?", "?", "?", "?", "?", "?",
    "Trigger", "ThumbBtn", "ThumbBtn2", "TopBtn", "TopBtn2", "PinkieBtn", "BaseBtn", "BaseBtn2",
    "BaseBtn3", "BaseBtn4", "BaseBtn5", "BaseBtn6", "?", "?", "?", "BtnDead",
    "BtnA", "BtnB", "BtnC", "BtnX", "BtnY", "BtnZ", "BtnTL", "BtnTR",
    "BtnTL2", "BtnTR2", "BtnSelect", "BtnStart", "BtnMode", "BtnThumbL", "BtnThumbR", "?",
    "?", "?", "?", "?", "?", "?", "?", "?",
    "?", "?", "?", "?", "?", "?", "?", "?",
    "WheelBtn", "Gear up"
];

/// The hardware-reported role of an axis (an `ABS_*` code).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AxisKind( pub u8 );

impl AxisKind {
    pub const X       : AxisKind = AxisKind( 0x00 );
    pub const Y       : AxisKind = AxisKind( 0x01 );
    pub const Z       : AxisKind = AxisKind( 0x02 );
    pub const RX      : AxisKind = AxisKind( 0x03 );
    pub const RY      : AxisKind = AxisKind( 0x04 );
    pub const RZ      : AxisKind = AxisKind( 0x05 );
    pub const THROTTLE: AxisKind = AxisKind( 0x06 );
    pub const RUDDER  : AxisKind = AxisKind( 0x07 );
    pub const WHEEL   : AxisKind = AxisKind( 0x08 );
    pub const GAS     : AxisKind = AxisKind( 0x09 );
    pub const BRAKE   : AxisKind = AxisKind( 0x0a );
    pub const HAT0X   : AxisKind = AxisKind( 0x10 );
    pub const HAT0Y   : AxisKind = AxisKind( 0x11 );
    pub const HAT1X   : AxisKind = AxisKind( 0x12 );
    pub const HAT1Y   : AxisKind = AxisKind( 0x13 );
    pub const HAT2X   : AxisKind = AxisKind( 0x14 );
    pub const HAT2Y   : AxisKind = AxisKind( 0x15 );
    pub const HAT3X   : AxisKind = AxisKind( 0x16 );
    pub const HAT3Y   : AxisKind = AxisKind( 0x17 );

    /// Returns a human-readable label, e.g. "Throttle", or "?" if the code is unnamed.
    pub fn name( self ) -> &'static str {
        AXIS_NAMES.get( self.0 as usize ).copied().unwrap_or( UNKNOWN )
    }
}

impl fmt::Display for AxisKind {
    fn fmt( &self, fmt: &mut fmt::Formatter ) -> fmt::Result {
        fmt.write_str( self.name() )
    }
}

impl fmt::Debug for AxisKind {
    fn fmt( &self, fmt: &mut fmt::Formatter ) -> fmt::Result {
        write!( fmt, "AxisKind({:#04x} = {})", self.0, self.name() )
    }
}

/// The hardware-reported role of a button, as a raw kernel key code.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ButtonKind( pub u16 );

impl ButtonKind {
    pub const BTN_0     : ButtonKind = ButtonKind( 0x100 );
    pub const BTN_1     : ButtonKind = ButtonKind( 0x101 );
    pub const BTN_2     : ButtonKind = ButtonKind( 0x102 );
    pub const BTN_3     : ButtonKind = ButtonKind( 0x103 );
    pub const BTN_4     : ButtonKind = ButtonKind( 0x104 );
    pub const BTN_5     : ButtonKind = ButtonKind( 0x105 );
    pub const BTN_6     : ButtonKind = ButtonKind( 0x106 );
    pub const BTN_7     : ButtonKind = ButtonKind( 0x107 );
    pub const BTN_8     : ButtonKind = ButtonKind( 0x108 );
    pub const BTN_9     : ButtonKind = ButtonKind( 0x109 );
    pub const LEFT      : ButtonKind = ButtonKind( 0x110 );
    pub const RIGHT     : ButtonKind = ButtonKind( 0x111 );
    pub const MIDDLE    : ButtonKind = ButtonKind( 0x112 );
    pub const SIDE      : ButtonKind = ButtonKind( 0x113 );
    pub const EXTRA     : ButtonKind = ButtonKind( 0x114 );
    pub const FORWARD   : ButtonKind = ButtonKind( 0x115 );
    pub const BACK      : ButtonKind = ButtonKind( 0x116 );
    pub const TASK      : ButtonKind = ButtonKind( 0x117 );
    pub const TRIGGER   : ButtonKind = ButtonKind( 0x120 );
    pub const THUMB     : ButtonKind = ButtonKind( 0x121 );
    pub const THUMB2    : ButtonKind = ButtonKind( 0x122 );
    pub const TOP       : ButtonKind = ButtonKind( 0x123 );
    pub const TOP2      : ButtonKind = ButtonKind( 0x124 );
    pub const PINKIE    : ButtonKind = ButtonKind( 0x125 );
    pub const BASE      : ButtonKind = ButtonKind( 0x126 );
    pub const BASE2     : ButtonKind = ButtonKind( 0x127 );
    pub const BASE3     : ButtonKind = ButtonKind( 0x128 );
    pub const BASE4     : ButtonKind = ButtonKind( 0x129 );
    pub const BASE5     : ButtonKind = ButtonKind( 0x12a );
    pub const BASE6     : ButtonKind = ButtonKind( 0x12b );
    pub const DEAD      : ButtonKind = ButtonKind( 0x12f );
    pub const A         : ButtonKind = ButtonKind( 0x130 );
    pub const B         : ButtonKind = ButtonKind( 0x131 );
    pub const C         : ButtonKind = ButtonKind( 0x132 );
    pub const X         : ButtonKind = ButtonKind( 0x133 );
    pub const Y         : ButtonKind = ButtonKind( 0x134 );
    pub const Z         : ButtonKind = ButtonKind( 0x135 );
    pub const TL        : ButtonKind = ButtonKind( 0x136 );
    pub const TR        : ButtonKind = ButtonKind( 0x137 );
    pub const TL2       : ButtonKind = ButtonKind( 0x138 );
    pub const TR2       : ButtonKind = ButtonKind( 0x139 );
    pub const SELECT    : ButtonKind = ButtonKind( 0x13a );
    pub const START     : ButtonKind = ButtonKind( 0x13b );
    pub const MODE      : ButtonKind = ButtonKind( 0x13c );
    pub const THUMB_L   : ButtonKind = ButtonKind( 0x13d );
    pub const THUMB_R   : ButtonKind = ButtonKind( 0x13e );
    pub const WHEEL     : ButtonKind = ButtonKind( 0x150 );
    pub const GEAR_UP   : ButtonKind = ButtonKind( 0x151 );

    /// The code relative to `BTN_MISC`, if the code isn't below it.
    pub fn offset( self ) -> Option< u16 > {
        self.0.checked_sub( BTN_MISC )
    }

    /// Returns a human-readable label, e.g. "Trigger", or "?" if the code is unnamed.
    pub fn name( self ) -> &'static str {
        self.offset()
            .and_then( |offset| BUTTON_NAMES.get( offset as usize ) )
            .copied()
            .unwrap_or( UNKNOWN )
    }
}

impl fmt::Display for ButtonKind {
    fn fmt( &self, fmt: &mut fmt::Formatter ) -> fmt::Result {
        fmt.write_str( self.name() )
    }
}

impl fmt::Debug for ButtonKind {
    fn fmt( &self, fmt: &mut fmt::Formatter ) -> fmt::Result {
        write!( fmt, "ButtonKind({:#05x} = {})", self.0, self.name() )
    }
}
