mod agent;
mod server;

pub use agent::AgentConfig;
pub use server::ServerConfig;

fn fix_protocol_prefix(addr: &str) -> String {
    let addr = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    addr.trim_end_matches('/').to_string()
}
