//! 64 位 ID 生成。
//!
//! 由字符串派生的 ID（例如邮箱 → 用户 ID）必须跨进程稳定，
//! 这里取 UUIDv5 的前 8 字节并清除最高位，保证能写入有符号 bigint 列。

const ID_MASK: u64 = i64::MAX as u64;

/// 由名称派生稳定 ID。
pub fn stable_id(name: &str) -> u64 {
    let uuid = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, name.as_bytes());
    head_u64(uuid.as_bytes()) & ID_MASK
}

/// 生成随机 ID（新实体）。
pub fn random_id() -> u64 {
    let uuid = uuid::Uuid::new_v4();
    let id = head_u64(uuid.as_bytes()) & ID_MASK;
    if id == 0 { 1 } else { id }
}

fn head_u64(bytes: &[u8; 16]) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(head)
}
