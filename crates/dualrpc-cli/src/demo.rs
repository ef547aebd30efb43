//! Demo objects served by `dualrpc serve` and passed by `dualrpc demo`.

use dualrpc_wire::{Args, LocalObject, Session, Variant, VariantMap, WireError, WireResult};
use futures::FutureExt;

/// Name `foo` asks the callback about when the caller gives none.
const DEFAULT_NAME: &str = "Sergey";

/// Root object exposed by the server.
///
/// - `echo(..)` returns its arguments.
/// - `boo(name)` returns `{"name": name, "fam": "Smirnov"}`.
/// - `foo(obj, name?)` calls `obj.boo(name=...)` back on the caller and adds
///   `"otch": "Petrovich"` to the answer.
pub fn root_object() -> LocalObject {
    LocalObject::new()
        .method("echo", |args: Args| Ok(args.pack()))
        .method("boo", boo)
        .session_method("foo", |session, args| foo(session, args).boxed())
}

/// Callback object the client hands to `foo`.
pub fn person() -> LocalObject {
    LocalObject::new().method("boo", boo)
}

fn boo(args: Args) -> WireResult<Variant> {
    let name = args.require(0, "name")?.clone();
    Ok(VariantMap::new()
        .with("name", name)
        .with("fam", "Smirnov")
        .into())
}

async fn foo(session: &mut Session, args: Args) -> WireResult<Variant> {
    let obj = args
        .require(0, "obj")?
        .as_remote()
        .copied()
        .ok_or_else(|| WireError::InvalidArgument("obj must be an object".to_string()))?;
    let name = args
        .lookup(1, "name")
        .cloned()
        .unwrap_or_else(|| Variant::from(DEFAULT_NAME));

    let reply = obj
        .call(session, "boo", Args::new().kwarg("name", name))
        .await?;
    let mut map = reply
        .as_map()
        .cloned()
        .ok_or_else(|| WireError::application(format!("boo returned {}", reply.repr(60))))?;
    map.insert("otch", "Petrovich");
    Ok(Variant::Map(map))
}
