//! 32-bit packed instructions.
//!
//! Layout (bit 31 down to bit 0):
//!
//! ```text
//! +---------+---------+---------+----------+
//! |  A (9)  |  B (9)  |  C (7)  | op (7)   |
//! +---------+---------+---------+----------+
//! |  A (9)  |      Bx (16)      | op (7)   |
//! +---------+-------------------+----------+
//! |            Ax (25)          | op (7)   |
//! +-----------------------------+----------+
//! ```
//!
//! `sBx` is `Bx` biased by [`MAXARG_SBX`] so a 16-bit field carries a
//! signed offset. The closure-creating instruction splits `Bx` into a
//! 14-bit child index and a 2-bit flag field. The argument-reconciliation
//! and scope-addressing instructions pack multi-field descriptors into
//! `Ax`/`Bx`; see [`ParamSpec`] and [`ArgScope`].

use std::fmt;

/// Bias for the signed 16-bit operand.
pub const MAXARG_SBX: i32 = 0x7FFF;

/// Argument count marking "arguments packed into one array".
pub const CALL_MAXARGS: u32 = 127;

/// Closure flag: enforce declared arity.
pub const LAMBDA_STRICT: u32 = 1;
/// Closure flag: capture the creating frame's environment.
pub const LAMBDA_CAPTURE: u32 = 2;

/// Operand shapes, used by the disassembler.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstructionFormat {
    Z,
    A,
    Ab,
    Abc,
    ABx,
    AsBx,
    SBx,
    Bx,
    Ax,
    /// A plus the 14:2 child/flags split.
    Abz,
}

macro_rules! opcodes {
    ($(($num:literal, $name:ident, $mnemonic:literal, $fmt:ident)),* $(,)?) => {
        /// Every operation the dispatch engine understands.
        ///
        /// The numbering is part of the encoding; reordering variants
        /// changes the bytecode format.
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $num,)*
        }

        impl Opcode {
            pub fn from_u32(v: u32) -> Option<Opcode> {
                match v {
                    $($num => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            pub fn format(self) -> InstructionFormat {
                match self {
                    $(Opcode::$name => InstructionFormat::$fmt,)*
                }
            }
        }
    };
}

opcodes! {
    (0,  Nop,            "NOP",      Z),
    (1,  Move,           "MOVE",     Ab),
    (2,  LoadLiteral,    "LOADL",    ABx),
    (3,  LoadInt,        "LOADI",    AsBx),
    (4,  LoadSym,        "LOADSYM",  ABx),
    (5,  LoadNil,        "LOADNIL",  A),
    (6,  LoadSelf,       "LOADSELF", A),
    (7,  LoadTrue,       "LOADT",    A),
    (8,  LoadFalse,      "LOADF",    A),
    (9,  GetGlobal,      "GETGLOBAL", ABx),
    (10, SetGlobal,      "SETGLOBAL", ABx),
    (11, GetSpecial,     "GETSPECIAL", ABx),
    (12, SetSpecial,     "SETSPECIAL", ABx),
    (13, GetIvar,        "GETIV",    ABx),
    (14, SetIvar,        "SETIV",    ABx),
    (15, GetCvar,        "GETCV",    ABx),
    (16, SetCvar,        "SETCV",    ABx),
    (17, GetConst,       "GETCONST", ABx),
    (18, SetConst,       "SETCONST", ABx),
    (19, GetScopedConst, "GETMCNST", ABx),
    (20, SetScopedConst, "SETMCNST", ABx),
    (21, GetUpvar,       "GETUPVAR", Abc),
    (22, SetUpvar,       "SETUPVAR", Abc),
    (23, Jump,           "JMP",      SBx),
    (24, JumpIf,         "JMPIF",    AsBx),
    (25, JumpNot,        "JMPNOT",   AsBx),
    (26, OnErr,          "ONERR",    SBx),
    (27, Rescue,         "RESCUE",   A),
    (28, PopErr,         "POPERR",   A),
    (29, Raise,          "RAISE",    A),
    (30, EnsurePush,     "EPUSH",    Bx),
    (31, EnsurePop,      "EPOP",     A),
    (32, Send,           "SEND",     Abc),
    (33, FuncSend,       "FSEND",    Abc),
    (34, ValueSend,      "VSEND",    Ab),
    (35, Call,           "CALL",     A),
    (36, Super,          "SUPER",    Abc),
    (37, ArgArray,       "ARGARY",   ABx),
    (38, Enter,          "ENTER",    Ax),
    (39, KeyArg,         "KARG",     Abc),
    (40, KeyDict,        "KDICT",    A),
    (41, Return,         "RETURN",   Ab),
    (42, TailCall,       "TAILCALL", Abc),
    (43, BlockPush,      "BLKPUSH",  ABx),
    (44, Add,            "ADD",      Abc),
    (45, AddImm,         "ADDI",     Abc),
    (46, Sub,            "SUB",      Abc),
    (47, SubImm,         "SUBI",     Abc),
    (48, Mul,            "MUL",      Abc),
    (49, Div,            "DIV",      Abc),
    (50, Eq,             "EQ",       Abc),
    (51, Lt,             "LT",       Abc),
    (52, Le,             "LE",       Abc),
    (53, Gt,             "GT",       Abc),
    (54, Ge,             "GE",       Abc),
    (55, MakeArray,      "ARRAY",    Abc),
    (56, ArrayCat,       "ARYCAT",   Ab),
    (57, ArrayPush,      "ARYPUSH",  Ab),
    (58, ArrayRef,       "AREF",     Abc),
    (59, ArraySet,       "ASET",     Abc),
    (60, ArrayPost,      "APOST",    Abc),
    (61, MakeString,     "STRING",   ABx),
    (62, StrCat,         "STRCAT",   Ab),
    (63, MakeHash,       "HASH",     Abc),
    (64, Lambda,         "LAMBDA",   Abz),
    (65, MakeRange,      "RANGE",    Abc),
    (66, RootClass,      "OCLASS",   A),
    (67, DefClass,       "CLASS",    Ab),
    (68, DefModule,      "MODULE",   Ab),
    (69, Exec,           "EXEC",     ABx),
    (70, DefMethod,      "METHOD",   Ab),
    (71, SingletonClass, "SCLASS",   Ab),
    (72, TargetClass,    "TCLASS",   A),
    (73, Debug,          "DEBUG",    Abc),
    (74, Stop,           "STOP",     Z),
    (75, Err,            "ERR",      Bx),
}

/// One packed instruction word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn abc(op: Opcode, a: u32, b: u32, c: u32) -> Instruction {
        debug_assert!(a < 512 && b < 512 && c < 128);
        Instruction((a << 23) | (b << 14) | (c << 7) | op as u32)
    }

    #[inline]
    pub fn abx(op: Opcode, a: u32, bx: u32) -> Instruction {
        debug_assert!(a < 512 && bx < 0x1_0000);
        Instruction((a << 23) | (bx << 7) | op as u32)
    }

    #[inline]
    pub fn asbx(op: Opcode, a: u32, sbx: i32) -> Instruction {
        debug_assert!((-MAXARG_SBX..=MAXARG_SBX + 1).contains(&sbx));
        Instruction::abx(op, a, (sbx + MAXARG_SBX) as u32)
    }

    #[inline]
    pub fn new_ax(op: Opcode, ax: u32) -> Instruction {
        debug_assert!(ax < 0x200_0000);
        Instruction((ax << 7) | op as u32)
    }

    /// Closure creation: child index (14 bits) and flags (2 bits).
    #[inline]
    pub fn abz(op: Opcode, a: u32, b: u32, z: u32) -> Instruction {
        debug_assert!(a < 512 && b < 0x4000 && z < 4);
        Instruction((a << 23) | (b << 9) | (z << 7) | op as u32)
    }

    // -------------------------------------------------------------------------
    // Field extraction
    // -------------------------------------------------------------------------

    #[inline]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_u32(self.0 & 0x7F)
    }

    #[inline]
    pub fn a(self) -> u32 {
        (self.0 >> 23) & 0x1FF
    }

    #[inline]
    pub fn b(self) -> u32 {
        (self.0 >> 14) & 0x1FF
    }

    #[inline]
    pub fn c(self) -> u32 {
        (self.0 >> 7) & 0x7F
    }

    #[inline]
    pub fn bx(self) -> u32 {
        (self.0 >> 7) & 0xFFFF
    }

    #[inline]
    pub fn sbx(self) -> i32 {
        self.bx() as i32 - MAXARG_SBX
    }

    #[inline]
    pub fn ax(self) -> u32 {
        (self.0 >> 7) & 0x1FF_FFFF
    }

    /// 14-bit child-index half of the closure split.
    #[inline]
    pub fn bz_b(self) -> u32 {
        (self.0 >> 9) & 0x3FFF
    }

    /// 2-bit flag half of the closure split.
    #[inline]
    pub fn bz_z(self) -> u32 {
        (self.0 >> 7) & 0x3
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.opcode() {
            Some(op) => op,
            None => return write!(f, "<invalid {:08x}>", self.0),
        };
        match op.format() {
            InstructionFormat::Z => write!(f, "{}", op.mnemonic()),
            InstructionFormat::A => write!(f, "{} {}", op.mnemonic(), self.a()),
            InstructionFormat::Ab => write!(f, "{} {} {}", op.mnemonic(), self.a(), self.b()),
            InstructionFormat::Abc => write!(
                f,
                "{} {} {} {}",
                op.mnemonic(),
                self.a(),
                self.b(),
                self.c()
            ),
            InstructionFormat::ABx => write!(f, "{} {} {}", op.mnemonic(), self.a(), self.bx()),
            InstructionFormat::AsBx => write!(f, "{} {} {}", op.mnemonic(), self.a(), self.sbx()),
            InstructionFormat::SBx => write!(f, "{} {}", op.mnemonic(), self.sbx()),
            InstructionFormat::Bx => write!(f, "{} {}", op.mnemonic(), self.bx()),
            InstructionFormat::Ax => write!(f, "{} {:#x}", op.mnemonic(), self.ax()),
            InstructionFormat::Abz => write!(
                f,
                "{} {} {} {}",
                op.mnemonic(),
                self.a(),
                self.bz_b(),
                self.bz_z()
            ),
        }
    }
}

/// Return modes carried in the B field of the return instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReturnMode {
    Normal = 0,
    Break = 1,
    Return = 2,
}

impl ReturnMode {
    pub fn from_u32(v: u32) -> Option<ReturnMode> {
        match v {
            0 => Some(ReturnMode::Normal),
            1 => Some(ReturnMode::Break),
            2 => Some(ReturnMode::Return),
            _ => None,
        }
    }
}

/// Declared parameter shape, packed into `Ax` as
/// `m1:5 | o:5 | r:1 | m2:5 | k:5 | kd:1 | b:1`.
///
/// `m1` required prefix, `o` optionals, `r` rest flag, `m2` required
/// suffix; the keyword fields are reserved.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ParamSpec {
    pub m1: u32,
    pub o: u32,
    pub r: bool,
    pub m2: u32,
    pub k: u32,
    pub kd: bool,
    pub b: bool,
}

impl ParamSpec {
    pub fn required(m1: u32) -> ParamSpec {
        ParamSpec {
            m1,
            ..ParamSpec::default()
        }
    }

    pub fn unpack(ax: u32) -> ParamSpec {
        ParamSpec {
            m1: (ax >> 18) & 0x1F,
            o: (ax >> 13) & 0x1F,
            r: (ax >> 12) & 0x1 != 0,
            m2: (ax >> 7) & 0x1F,
            k: (ax >> 2) & 0x1F,
            kd: (ax >> 1) & 0x1 != 0,
            b: ax & 0x1 != 0,
        }
    }

    pub fn pack(self) -> u32 {
        (self.m1 << 18)
            | (self.o << 13)
            | ((self.r as u32) << 12)
            | (self.m2 << 7)
            | (self.k << 2)
            | ((self.kd as u32) << 1)
            | self.b as u32
    }

    /// Reconciled register span: `m1 + o + r + m2`.
    pub fn len(self) -> u32 {
        self.m1 + self.o + self.r as u32 + self.m2
    }
}

/// Enclosing-scope argument descriptor, packed into `Bx` as
/// `m1:6 | r:1 | m2:5 | lv:4`. `lv` is the nesting level: 0 addresses
/// the local window, anything above walks the environment chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ArgScope {
    pub m1: u32,
    pub r: bool,
    pub m2: u32,
    pub lv: u32,
}

impl ArgScope {
    pub fn unpack(bx: u32) -> ArgScope {
        ArgScope {
            m1: (bx >> 10) & 0x3F,
            r: (bx >> 9) & 0x1 != 0,
            m2: (bx >> 4) & 0x1F,
            lv: bx & 0xF,
        }
    }

    pub fn pack(self) -> u32 {
        (self.m1 << 10) | ((self.r as u32) << 9) | (self.m2 << 4) | self.lv
    }
}
