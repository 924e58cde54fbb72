//! 持久化布局常量与键编码
//!
//! sled 没有嵌套 bucket，这里把 `patches/<uuid>/...` 的层级压平成一棵有序 Tree：
//! - `<uuid> 0x00 stamp`
//! - `<uuid> 0x00 patchError`
//! - `<uuid> 0x00 source`
//! - `<uuid> 0x00 operations 0x00 <u64 大端序号>`
//!
//! 同一 patch 的所有键共享 `<uuid> 0x00` 前缀，在 Tree 中连续排列；
//! 操作键按序号大端编码，扫描顺序即入队顺序。

/// 存储目录下的文件名
pub const DB_FILE_NAME: &str = "patches";
/// 顶层命名空间（sled Tree 名称）
pub const PATCH_TREE: &[u8] = b"patches";
pub const STAMP_KEY: &[u8] = b"stamp";
pub const PATCH_ERROR_KEY: &[u8] = b"patchError";
pub const SOURCE_KEY: &[u8] = b"source";
pub const OPERATIONS_KEY: &[u8] = b"operations";
/// 层级分隔符
pub const SEPARATOR: u8 = 0x00;

/// patch 命名空间下的一条记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchEntry {
    Stamp,
    PatchError,
    Source,
    Operation(u64),
    Unknown,
}

/// `<uuid> 0x00`
pub fn patch_prefix(uuid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(uuid.len() + 1);
    key.extend_from_slice(uuid.as_bytes());
    key.push(SEPARATOR);
    key
}

/// `<uuid> 0x00 <name>`
pub fn entry_key(uuid: &str, name: &[u8]) -> Vec<u8> {
    let mut key = patch_prefix(uuid);
    key.extend_from_slice(name);
    key
}

/// `<uuid> 0x00 operations 0x00 <seq>`
pub fn operation_key(uuid: &str, seq: u64) -> Vec<u8> {
    let mut key = entry_key(uuid, OPERATIONS_KEY);
    key.push(SEPARATOR);
    key.extend_from_slice(&itob(seq));
    key
}

/// 解析一个键，返回所属 patch 的 UUID 和记录类型
pub fn parse_key(key: &[u8]) -> Option<(String, PatchEntry)> {
    let split = key.iter().position(|b| *b == SEPARATOR)?;
    let uuid = std::str::from_utf8(&key[..split]).ok()?.to_string();
    let rest = &key[split + 1..];

    let entry = match rest {
        STAMP_KEY => PatchEntry::Stamp,
        PATCH_ERROR_KEY => PatchEntry::PatchError,
        SOURCE_KEY => PatchEntry::Source,
        _ => parse_operation_entry(rest).unwrap_or(PatchEntry::Unknown),
    };
    Some((uuid, entry))
}

fn parse_operation_entry(rest: &[u8]) -> Option<PatchEntry> {
    let seq = rest.strip_prefix(OPERATIONS_KEY)?.strip_prefix(&[SEPARATOR])?;
    let bytes: [u8; 8] = seq.try_into().ok()?;
    Some(PatchEntry::Operation(u64::from_be_bytes(bytes)))
}

/// UUID 会被用作键前缀，不能包含分隔符
pub fn is_valid_uuid(uuid: &str) -> bool {
    !uuid.is_empty() && !uuid.as_bytes().contains(&SEPARATOR)
}

/// u64 的 8 字节大端表示
pub fn itob(v: u64) -> [u8; 8] {
    v.to_be_bytes()
}
