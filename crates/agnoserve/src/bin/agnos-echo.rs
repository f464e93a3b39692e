//! A small service for trying out clients and server modes.
//!
//! ```bash
//! agnos-echo -m threaded -p 17731
//! agnos-echo -m lib
//! ```

use std::sync::Arc;

use agnopack::Packer;
use agnopack::Value;
use agnorpc::Function;
use agnorpc::ObjectTable;
use agnorpc::Service;
use agnorpc::ServiceDescriptor;
use agnorpc::ServiceTable;

async fn echo(mut args: Vec<Value>) -> anyhow::Result<Value> {
    Ok(args.pop().unwrap_or(Value::Null))
}

async fn add(args: Vec<Value>) -> anyhow::Result<Value> {
    let sum = args.iter().filter_map(Value::as_i32).fold(0i32, i32::wrapping_add);
    Ok(Value::Int32(sum))
}

fn echo_service(_objects: Arc<ObjectTable>) -> Arc<dyn Service> {
    let descriptor = ServiceDescriptor::new("Echo").idl_magic("echo-1").supports("1.0");
    Arc::new(
        ServiceTable::new(descriptor)
            .with_function(
                Function::new(1, "echo", echo)
                    .arg("text", "str", Packer::Str)
                    .returns("str", Packer::Str),
            )
            .with_function(
                Function::new(2, "add", add)
                    .arg("a", "int32", Packer::Int32)
                    .arg("b", "int32", Packer::Int32)
                    .returns("int32", Packer::Int32),
            ),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agnoserve::server_main(Arc::new(echo_service)).await
}
