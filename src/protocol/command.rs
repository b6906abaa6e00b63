//! Command table: names, opcodes and field layouts.
//!
//! Every packet on the wire is identified by a numeric opcode. Each opcode has a
//! fixed, ordered list of fields that are NUL-joined in the payload. The table
//! below is the single source for both lookup directions:
//!
//! - name → spec, used when sending
//! - opcode → spec, used when decoding (built lazily on first use)
//!
//! # Example
//!
//! ```
//! use gearman_client::protocol::CommandTable;
//!
//! let table = CommandTable::standard();
//! let spec = table.by_name("submit_job").unwrap();
//! assert_eq!(spec.opcode, 7);
//! assert_eq!(spec.fields, &["func", "uniq", "arg"]);
//! assert_eq!(table.by_opcode(8).unwrap().name, "job_created");
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

/// Opcode constants for the binary protocol.
pub mod opcode {
    pub const CAN_DO: u32 = 1;
    pub const CANT_DO: u32 = 2;
    pub const RESET_ABILITIES: u32 = 3;
    pub const PRE_SLEEP: u32 = 4;
    pub const NOOP: u32 = 6;
    pub const SUBMIT_JOB: u32 = 7;
    pub const JOB_CREATED: u32 = 8;
    pub const GRAB_JOB: u32 = 9;
    pub const NO_JOB: u32 = 10;
    pub const JOB_ASSIGN: u32 = 11;
    pub const WORK_STATUS: u32 = 12;
    pub const WORK_COMPLETE: u32 = 13;
    pub const WORK_FAIL: u32 = 14;
    pub const GET_STATUS: u32 = 15;
    pub const ECHO_REQ: u32 = 16;
    pub const ECHO_RES: u32 = 17;
    pub const SUBMIT_JOB_BG: u32 = 18;
    pub const ERROR: u32 = 19;
    pub const STATUS_RES: u32 = 20;
    pub const SUBMIT_JOB_HIGH: u32 = 21;
    pub const SET_CLIENT_ID: u32 = 22;
    pub const CAN_DO_TIMEOUT: u32 = 23;
    pub const ALL_YOURS: u32 = 24;
    pub const SUBMIT_JOB_HIGH_BG: u32 = 32;
    pub const SUBMIT_JOB_LOW: u32 = 33;
    pub const SUBMIT_JOB_LOW_BG: u32 = 34;
    pub const SUBMIT_JOB_EPOCH: u32 = 36;
}

/// Immutable description of one command.
#[derive(Debug, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command name (e.g. `"can_do"`).
    pub name: &'static str,
    /// Numeric opcode written in the header.
    pub opcode: u32,
    /// Payload fields, in wire order.
    pub fields: &'static [&'static str],
}

const fn spec(
    name: &'static str,
    opcode: u32,
    fields: &'static [&'static str],
) -> CommandSpec {
    CommandSpec {
        name,
        opcode,
        fields,
    }
}

static COMMANDS: [CommandSpec; 27] = [
    spec("can_do", opcode::CAN_DO, &["func"]),
    spec("can_do_timeout", opcode::CAN_DO_TIMEOUT, &["func", "timeout"]),
    spec("cant_do", opcode::CANT_DO, &["func"]),
    spec("reset_abilities", opcode::RESET_ABILITIES, &[]),
    spec("set_client_id", opcode::SET_CLIENT_ID, &["client_id"]),
    spec("pre_sleep", opcode::PRE_SLEEP, &[]),
    spec("noop", opcode::NOOP, &[]),
    spec("submit_job", opcode::SUBMIT_JOB, &["func", "uniq", "arg"]),
    spec("submit_job_high", opcode::SUBMIT_JOB_HIGH, &["func", "uniq", "arg"]),
    spec("submit_job_bg", opcode::SUBMIT_JOB_BG, &["func", "uniq", "arg"]),
    spec(
        "submit_job_epoch",
        opcode::SUBMIT_JOB_EPOCH,
        &["func", "uniq", "epoch", "arg"],
    ),
    spec("submit_job_high_bg", opcode::SUBMIT_JOB_HIGH_BG, &["func", "uniq", "arg"]),
    spec("submit_job_low", opcode::SUBMIT_JOB_LOW, &["func", "uniq", "arg"]),
    spec("submit_job_low_bg", opcode::SUBMIT_JOB_LOW_BG, &["func", "uniq", "arg"]),
    spec("job_created", opcode::JOB_CREATED, &["handle"]),
    spec("grab_job", opcode::GRAB_JOB, &[]),
    spec("no_job", opcode::NO_JOB, &[]),
    spec("job_assign", opcode::JOB_ASSIGN, &["handle", "func", "arg"]),
    spec(
        "work_status",
        opcode::WORK_STATUS,
        &["handle", "numerator", "denominator"],
    ),
    spec("work_complete", opcode::WORK_COMPLETE, &["handle", "result"]),
    spec("work_fail", opcode::WORK_FAIL, &["handle"]),
    spec("get_status", opcode::GET_STATUS, &["handle"]),
    spec(
        "status_res",
        opcode::STATUS_RES,
        &["handle", "known", "running", "numerator", "denominator"],
    ),
    spec("echo_req", opcode::ECHO_REQ, &["text"]),
    spec("echo_res", opcode::ECHO_RES, &["text"]),
    spec("error", opcode::ERROR, &["err_code", "err_text"]),
    spec("all_yours", opcode::ALL_YOURS, &[]),
];

/// Registry of known commands.
///
/// Created once and shared read-only (usually behind an `Arc`) by every
/// [`Codec`](super::Codec). The opcode index is built on the first decode.
#[derive(Debug)]
pub struct CommandTable {
    specs: &'static [CommandSpec],
    by_name: HashMap<&'static str, &'static CommandSpec>,
    by_opcode: OnceLock<HashMap<u32, &'static CommandSpec>>,
}

impl CommandTable {
    /// The standard protocol table.
    pub fn standard() -> Self {
        Self::from_specs(&COMMANDS)
    }

    /// Build a table over a custom static command list.
    pub fn from_specs(specs: &'static [CommandSpec]) -> Self {
        Self {
            specs,
            by_name: specs.iter().map(|s| (s.name, s)).collect(),
            by_opcode: OnceLock::new(),
        }
    }

    /// Look up a command by name.
    pub fn by_name(&self, name: &str) -> Option<&'static CommandSpec> {
        self.by_name.get(name).copied()
    }

    /// Look up a command by opcode.
    pub fn by_opcode(&self, opcode: u32) -> Option<&'static CommandSpec> {
        self.by_opcode
            .get_or_init(|| self.specs.iter().map(|s| (s.opcode, s)).collect())
            .get(&opcode)
            .copied()
    }

    /// Iterate over all commands in table order.
    pub fn iter(&self) -> impl Iterator<Item = &'static CommandSpec> {
        self.specs.iter()
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True if the table has no commands.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_directions_agree() {
        let table = CommandTable::standard();
        for spec in table.iter() {
            assert_eq!(table.by_name(spec.name), Some(spec));
            assert_eq!(table.by_opcode(spec.opcode), Some(spec));
        }
    }

    #[test]
    fn test_opcodes_are_unique() {
        let table = CommandTable::standard();
        let mut seen = std::collections::HashSet::new();
        for spec in table.iter() {
            assert!(seen.insert(spec.opcode), "duplicate opcode {}", spec.opcode);
        }
        assert_eq!(seen.len(), table.len());
    }

    #[test]
    fn test_known_opcodes() {
        let table = CommandTable::standard();
        let expected = [
            ("can_do", 1),
            ("cant_do", 2),
            ("reset_abilities", 3),
            ("pre_sleep", 4),
            ("noop", 6),
            ("submit_job", 7),
            ("job_created", 8),
            ("grab_job", 9),
            ("no_job", 10),
            ("job_assign", 11),
            ("work_status", 12),
            ("work_complete", 13),
            ("work_fail", 14),
            ("get_status", 15),
            ("echo_req", 16),
            ("echo_res", 17),
            ("submit_job_bg", 18),
            ("error", 19),
            ("status_res", 20),
            ("submit_job_high", 21),
            ("set_client_id", 22),
            ("can_do_timeout", 23),
            ("all_yours", 24),
            ("submit_job_high_bg", 32),
            ("submit_job_low", 33),
            ("submit_job_low_bg", 34),
            ("submit_job_epoch", 36),
        ];
        for (name, code) in expected {
            assert_eq!(table.by_name(name).unwrap().opcode, code, "{name}");
        }
    }

    #[test]
    fn test_epoch_field_order() {
        let table = CommandTable::standard();
        assert_eq!(
            table.by_name("submit_job_epoch").unwrap().fields,
            &["func", "uniq", "epoch", "arg"]
        );
    }

    #[test]
    fn test_unknown_lookups() {
        let table = CommandTable::standard();
        assert!(table.by_name("submit_everything").is_none());
        assert!(table.by_opcode(5).is_none());
        assert!(table.by_opcode(0xFFFF).is_none());
    }
}
