//! ISA layer: register files, CSRs and the instruction format table
//!
//! Everything the synthesizer knows about RISC-V as static data lives here;
//! the generator, encoder and parser consume it through these types.

pub mod csr;
pub mod formats;
pub mod register;
mod traits;

pub use formats::{
    Category, ExtensionTag, FormatTable, ImmKind, ImmSpec, InstructionFormat, Variable,
};
pub use register::{FloatRegister, IntRegister, RegRef};
pub use traits::RegisterType;
