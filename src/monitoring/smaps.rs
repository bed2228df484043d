/*!
 * smaps Inspection
 * Reads /proc/self/smaps to tell whether a mapping is excluded from core dumps
 *
 * Linux prints `dd` in a mapping's `VmFlags` line once MADV_DONTDUMP has been
 * applied to it.
 */

use serde::Serialize;
use std::fs;
use std::io;

const SMAPS_PATH: &str = "/proc/self/smaps";

/// VmFlags token for "do not include in core dump"
pub const DONT_DUMP_FLAG: &str = "dd";

/// One mapping from smaps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub start: usize,
    pub end: usize,
    pub perms: String,
    pub path: Option<String>,
    pub vm_flags: Vec<String>,
}

impl Mapping {
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the kernel will leave this mapping out of core dumps
    pub fn is_dump_excluded(&self) -> bool {
        self.vm_flags.iter().any(|f| f == DONT_DUMP_FLAG)
    }
}

/// Parse smaps text into mappings
///
/// Lines that fit neither a mapping header nor `VmFlags:` are skipped.
pub fn parse_smaps(text: &str) -> Vec<Mapping> {
    let mut mappings: Vec<Mapping> = Vec::new();

    for line in text.lines() {
        if let Some(flags) = line.strip_prefix("VmFlags:") {
            if let Some(current) = mappings.last_mut() {
                current.vm_flags = flags.split_whitespace().map(str::to_owned).collect();
            }
        } else if let Some(mapping) = parse_header(line) {
            mappings.push(mapping);
        }
    }

    mappings
}

fn parse_header(line: &str) -> Option<Mapping> {
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let start = usize::from_str_radix(start, 16).ok()?;
    let end = usize::from_str_radix(end, 16).ok()?;
    let perms = fields.next()?;
    if perms.len() != 4 {
        return None;
    }
    // offset, device, inode
    fields.nth(2)?;
    let path = fields.collect::<Vec<_>>().join(" ");

    Some(Mapping {
        start,
        end,
        perms: perms.to_owned(),
        path: if path.is_empty() { None } else { Some(path) },
        vm_flags: Vec::new(),
    })
}

/// Mapping of the current process containing `addr`
pub fn mapping_for(addr: usize) -> io::Result<Option<Mapping>> {
    let text = fs::read_to_string(SMAPS_PATH)?;
    Ok(parse_smaps(&text).into_iter().find(|m| m.contains(addr)))
}

/// Whether `addr` lies in a mapping flagged `dd`
///
/// `Ok(false)` also covers addresses that are not mapped at all.
pub fn is_dump_excluded(addr: usize) -> io::Result<bool> {
    Ok(mapping_for(addr)?.is_some_and(|m| m.is_dump_excluded()))
}
