//! storebox - command-line access to a file-backed store
//!
//! Opens the store file, runs a single command against it, prints the result
//! as JSON and flushes before exiting.

use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;
use storebox::{Client, FsDriver, FsOptions, JsonMap, MsgPack, Parser, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Snapshot format of the store file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    MsgPack,
}

/// CLI configuration
struct Config {
    /// Store file
    file: String,
    /// Snapshot format
    format: Format,
    /// Command name followed by its arguments
    command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            file: "storebox.json".to_string(),
            format: Format::Json,
            command: Vec::new(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--file" | "-f" => {
                    if i + 1 < args.len() {
                        config.file = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --file requires a value");
                        std::process::exit(1);
                    }
                }
                "--format" => {
                    if i + 1 < args.len() {
                        config.format = match args[i + 1].as_str() {
                            "json" => Format::Json,
                            "msgpack" => Format::MsgPack,
                            other => {
                                eprintln!("Error: unknown format '{}'", other);
                                std::process::exit(1);
                            }
                        };
                        i += 2;
                    } else {
                        eprintln!("Error: --format requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("storebox version {}", storebox::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    config.command = args[i..].to_vec();
                    break;
                }
            }
        }

        if config.command.is_empty() {
            print_help();
            std::process::exit(1);
        }

        config
    }

    fn options(&self) -> FsOptions {
        let parser: Arc<dyn Parser> = match self.format {
            Format::Json => Arc::new(JsonMap),
            Format::MsgPack => Arc::new(MsgPack),
        };
        FsOptions {
            parser,
            ..FsOptions::default()
        }
    }
}

fn print_help() {
    println!(
        r#"
storebox - hashes, lists and TTLs in a single file

USAGE:
    storebox [OPTIONS] <COMMAND> [ARGS...]

OPTIONS:
    -f, --file <PATH>        Store file (default: storebox.json)
        --format <FORMAT>    json or msgpack (default: json)
    -v, --version            Print version information
    -h, --help               Print this help message

COMMANDS:
    get <key>                      set <key> <value>
    setex <key> <value> <secs>     del <key>
    exists <key>                   keys
    getall                         ttl <key>
    pttl <key>                     clear
    hget <key> <field>             hset <key> <field> <value>
    hsetex <key> <field> <value> <secs>
    hdel <key> <field>             hgetall <key>
    lpush <key> <value>            lpop <key>
    lget <key> <index>             lset <key> <index> <value>
    lrange <key> <start> <stop>    lgetall <key>

VALUES:
    Arguments that parse as JSON are stored as JSON, anything else as a string.

EXAMPLES:
    storebox set name Ariz
    storebox hset user:1 age 31
    storebox setex session '{{"id":7}}' 30
    storebox --format msgpack -f db.b64 lrange jobs 0 -1
"#
    );
}

/// Parses a command-line value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_secs(raw: &str) -> anyhow::Result<Duration> {
    let secs: f64 = raw
        .parse()
        .with_context(|| format!("invalid TTL '{}'", raw))?;
    match Duration::try_from_secs_f64(secs) {
        Ok(ttl) => Ok(ttl),
        Err(_) => bail!("invalid TTL '{}'", raw),
    }
}

fn parse_index(raw: &str) -> anyhow::Result<usize> {
    raw.parse()
        .with_context(|| format!("invalid index '{}'", raw))
}

fn parse_bound(raw: &str) -> anyhow::Result<i64> {
    raw.parse()
        .with_context(|| format!("invalid range bound '{}'", raw))
}

/// Runs one command and returns its JSON result.
async fn execute(client: &Client, command: &[String]) -> anyhow::Result<Value> {
    let name = command[0].to_ascii_lowercase();
    let args: Vec<&str> = command[1..].iter().map(String::as_str).collect();

    let ok = Value::String("OK".to_string());
    let opt = |value: Option<Value>| value.unwrap_or(Value::Null);

    let result = match (name.as_str(), args.as_slice()) {
        ("get", [key]) => opt(client.get(key).await?),
        ("set", [key, value]) => {
            client.set(key, parse_value(value)).await?;
            ok
        }
        ("setex", [key, value, secs]) => {
            client.setex(key, parse_value(value), parse_secs(secs)?).await?;
            ok
        }
        ("del", [key]) => {
            client.del(key).await?;
            ok
        }
        ("exists", [key]) => Value::Bool(client.exists(key).await?),
        ("keys", []) => serde_json::to_value(client.keys().await?)?,
        ("getall", []) => Value::Object(client.getall().await?),
        ("ttl", [key]) => Value::from(client.ttl(key).await?),
        ("pttl", [key]) => Value::from(client.pttl(key).await?),
        ("clear", []) => {
            client.clear().await?;
            ok
        }
        ("hget", [key, field]) => opt(client.hget(key, field).await?),
        ("hset", [key, field, value]) => {
            client.hset(key, field, parse_value(value)).await?;
            ok
        }
        ("hsetex", [key, field, value, secs]) => {
            client
                .hsetex(key, field, parse_value(value), parse_secs(secs)?)
                .await?;
            ok
        }
        ("hdel", [key, field]) => {
            client.hdel(key, field).await?;
            ok
        }
        ("hgetall", [key]) => Value::Object(client.hgetall(key).await?),
        ("lpush", [key, value]) => Value::from(client.lpush(key, parse_value(value)).await?),
        ("lpop", [key]) => opt(client.lpop(key).await?),
        ("lget", [key, index]) => opt(client.lget(key, parse_index(index)?).await?),
        ("lset", [key, index, value]) => {
            client
                .lset(key, parse_index(index)?, parse_value(value))
                .await?;
            ok
        }
        ("lrange", [key, start, stop]) => Value::Array(
            client
                .lrange(key, parse_bound(start)?, parse_bound(stop)?)
                .await?,
        ),
        ("lgetall", [key]) => Value::Array(client.lgetall(key).await?),
        _ => bail!(
            "unknown command or wrong number of arguments: {} (see --help)",
            command.join(" ")
        ),
    };

    Ok(result)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; stdout is reserved for results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let driver = Arc::new(
        FsDriver::new(&config.file, config.options())
            .with_context(|| format!("failed to open {}", config.file))?,
    );
    let client = Client::open(driver.clone()).await?;
    debug!(file = %config.file, "Store opened");

    let result = execute(&client, &config.command).await?;
    println!("{}", serde_json::to_string(&result)?);

    client.flush().await?;
    let stats = driver.stats();
    debug!(flushes = stats.flushes, failures = stats.failures, "Store flushed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("{\"a\":1}"), json!({ "a": 1 }));
        assert_eq!(parse_value("Ariz"), json!("Ariz"));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_secs("-1").is_err());
        assert!(parse_secs("soon").is_err());
        assert!(parse_secs("1e300").is_err());
        assert!(parse_secs("inf").is_err());
    }

    #[tokio::test]
    async fn test_execute() {
        let client = Client::in_memory();

        let set = execute(&client, &command(&["set", "name", "Ariz"])).await;
        assert_eq!(set.unwrap(), json!("OK"));
        let get = execute(&client, &command(&["GET", "name"])).await;
        assert_eq!(get.unwrap(), json!("Ariz"));

        execute(&client, &command(&["lpush", "jobs", "1"])).await.unwrap();
        execute(&client, &command(&["lpush", "jobs", "2"])).await.unwrap();
        let range = execute(&client, &command(&["lrange", "jobs", "0", "-1"])).await;
        assert_eq!(range.unwrap(), json!([1]));

        let missing = execute(&client, &command(&["hget", "user", "x"])).await;
        assert_eq!(missing.unwrap(), Value::Null);

        assert!(execute(&client, &command(&["get"])).await.is_err());
        assert!(execute(&client, &command(&["frobnicate", "x"])).await.is_err());
    }
}
