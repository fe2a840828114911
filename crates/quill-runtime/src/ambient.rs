//! Ambient capabilities installed into every execution context.
//!
//! - `console.{log,info,warn,error,debug}` routed to `tracing`
//! - a minimal `process` object (`platform`, `arch`, `pid`, empty `env`)

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Type, Value};

#[derive(Clone, Copy)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Install the ambient globals for a context running `identity`.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, identity: &str) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let console = Object::new(ctx.clone())?;
    for (name, level) in [
        ("log", Level::Info),
        ("info", Level::Info),
        ("debug", Level::Debug),
        ("warn", Level::Warn),
        ("error", Level::Error),
    ] {
        let plugin = identity.to_string();
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<()> {
                let message = format_args(&ctx, args.0)?;
                emit(level, &plugin, &message);
                Ok(())
            },
        )?;
        console.set(name, func)?;
    }
    globals.set("console", console)?;

    let process = Object::new(ctx.clone())?;
    process.set("platform", std::env::consts::OS)?;
    process.set("arch", std::env::consts::ARCH)?;
    process.set("pid", std::process::id())?;
    process.set("env", Object::new(ctx.clone())?)?;
    globals.set("process", process)?;

    Ok(())
}

fn emit(level: Level, plugin: &str, message: &str) {
    match level {
        Level::Debug => tracing::debug!(plugin = %plugin, "{}", message),
        Level::Info => tracing::info!(plugin = %plugin, "{}", message),
        Level::Warn => tracing::warn!(plugin = %plugin, "{}", message),
        Level::Error => tracing::error!(plugin = %plugin, "{}", message),
    }
}

/// Join console arguments the way a browser console would print them.
pub(crate) fn format_args<'js>(ctx: &Ctx<'js>, args: Vec<Value<'js>>) -> rquickjs::Result<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let part = if let Some(s) = arg.as_string() {
            s.to_string()?
        } else if matches!(arg.type_of(), Type::Object | Type::Array) {
            match ctx.json_stringify(arg.clone())? {
                Some(s) => s.to_string()?,
                None => arg.get::<Coerced<String>>()?.0,
            }
        } else {
            arg.get::<Coerced<String>>()?.0
        };
        parts.push(part);
    }
    Ok(parts.join(" "))
}
