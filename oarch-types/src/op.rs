//! Operation-kind vocabulary shared between the engine, the config reader's
//! `get_num_work_items`, and the CLI.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchOpType {
    Backup,
    Restore,
    Archive,
    Scan,
    Stub,
    /// Anything not in the recognised set. `get_num_work_items` treats this
    /// (and any unrecognised kind) as disabled, per the Open Question
    /// decision recorded in DESIGN.md.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanType {
    Full,
    Incremental,
}
