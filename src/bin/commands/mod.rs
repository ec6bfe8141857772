pub mod inspect_cmd;
pub mod lookup_cmd;
pub mod networks_cmd;

pub use inspect_cmd::cmd_inspect;
pub use lookup_cmd::cmd_lookup;
pub use networks_cmd::cmd_networks;
