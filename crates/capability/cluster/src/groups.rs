//! 复制组 ID 约定。
//!
//! 农场配置组直接使用农场 ID，其余集合用稳定哈希派生，保证各节点计算结果一致。

use domain::stable_id;

/// 全局农场目录组（记录存在哪些农场）。
pub fn farm_directory() -> u64 {
    stable_id("crop:farm-directory")
}

/// 全局成员关系组（用户、组织、权限）。
pub fn membership() -> u64 {
    stable_id("crop:membership")
}

pub fn farm_config(farm_id: u64) -> u64 {
    farm_id
}

pub fn farm_state(farm_id: u64) -> u64 {
    stable_id(&format!("crop:farm:{farm_id}:state"))
}

pub fn device_state(device_id: u64) -> u64 {
    stable_id(&format!("crop:device:{device_id}:state"))
}

pub fn device_data(device_id: u64) -> u64 {
    stable_id(&format!("crop:device:{device_id}:data"))
}

pub fn event_log(farm_id: u64) -> u64 {
    stable_id(&format!("crop:farm:{farm_id}:event-log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_ids_are_distinct_per_collection() {
        let ids = [
            farm_config(7),
            farm_state(7),
            event_log(7),
            device_state(7),
            device_data(7),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
