/*!
# State History Client Command Line Interface

## Help

```bash
ship_client --help
```

## Example Usage

```bash
ship_client --host=127.0.0.1 --port=8080 --start_block=1000
```

Settings are read from `config.toml` in the working directory (or the file
given with `--config`) and `SHIP_`-prefixed environment variables, e.g.
`SHIP_NODE__HOST`. Command-line flags win.

## Dev

To run from source:

```bash
RUST_LOG=ship_client=debug cargo run -- --start_block=1000
```
*/

use ship_client::tail;

#[tokio::main]
pub async fn main() -> ship_client::Result<()> {
    tracing_subscriber::fmt::init();
    tail::run().await
}
