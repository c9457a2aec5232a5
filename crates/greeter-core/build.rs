/// Builds the gRPC client and server code for the greeter protocol using
/// `tonic-prost-build`.
///
/// Two packages are compiled from `proto/`:
///
/// - `hello.v1` - the `GreeterService` (`SayHello`)
/// - `user.v1` - the `UserService` (`GetUser`, `ValidateEmail`,
///   `CheckPermission`, `RateLimitCheck`)
///
/// # JSON Mapping
///
/// Every generated message also derives `serde::Serialize` and
/// `serde::Deserialize` with `camelCase` field names and per-field defaults.
/// This mirrors the proto3 JSON mapping, so the REST gateway can decode and
/// encode bodies with the exact message types the RPC transport uses.
/// Multi-word fields also accept their original proto name on input (for
/// example `user_id` as well as `userId`); output always uses camelCase.
///
/// # Descriptor Set
///
/// The encoded `FileDescriptorSet` is written to
/// `$OUT_DIR/greeter_descriptor.bin` and served by the reflection service.
///
/// # Panics
///
/// Panics if code generation fails.
use std::env;
use std::path::PathBuf;

const PROTOS: &[&str] = &["proto/hello/v1/hello.proto", "proto/user/v1/user.proto"];

/// Fields whose proto name differs from their camelCase JSON name.
const SNAKE_CASE_FIELDS: &[(&str, &str)] = &[
    (".user.v1.User.user_id", "user_id"),
    (".user.v1.User.created_at", "created_at"),
    (".user.v1.GetUserRequest.user_id", "user_id"),
    (".user.v1.CheckPermissionRequest.user_id", "user_id"),
    (".user.v1.RateLimitCheckRequest.user_id", "user_id"),
];

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("greeter_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .type_attribute(".", "#[serde(rename_all = \"camelCase\", default)]")
        .file_descriptor_set_path(&descriptor_path);

    for (path, name) in SNAKE_CASE_FIELDS {
        config.field_attribute(path, format!("#[serde(alias = \"{name}\")]"));
    }

    for proto in PROTOS {
        println!("cargo:rerun-if-changed={proto}");
    }

    tonic_prost_build::configure()
        .compile_with_config(config, PROTOS, &["proto"])
        .unwrap();
}
