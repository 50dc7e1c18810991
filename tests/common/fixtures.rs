//! Shared fixtures for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared helpers under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust,ignore
//! #[path = "common/fixtures.rs"]
//! mod fixtures;
//! ```

use ucloud_machine::UCloudConfig;

/// Returns a configuration that passes validation.
pub fn ucloud_config() -> UCloudConfig {
    UCloudConfig {
        public_key: String::from("ucloudexample@example.com1234567890"),
        private_key: String::from("46f09bb9fab4f12dfc160dae12273d5332b5debe"),
        region: String::from("cn-north-03"),
        image_id: String::from("uimage-5yt2b0"),
        user_password: String::from("Passw0rd!"),
        ssh_user: String::from("root"),
        ssh_port: 22,
        private_address_only: false,
        security_group: String::from("docker-machine"),
        cpu: 1,
        memory: 1024,
        disk_space: 20_000,
        key_pair_material: None,
        storage_path: String::from(".ucloud-machine"),
        wait_attempts: 10,
        wait_interval_secs: 1,
    }
}
