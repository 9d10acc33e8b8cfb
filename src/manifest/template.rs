use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tera::{Context, GlobalFn, Tera, Value};

use super::VariableBag;
use crate::engine::EngineClient;
use crate::{ErrorKind, Result};

// Nest a rendered block under a yaml key: every non-blank line gains
// `level` whole indentation steps (two spaces each, yaml style). Blank
// lines stay blank so the result survives yaml linting.
fn indent(v: Value, m: HashMap<String, Value>) -> tera::Result<Value> {
    let block: String = try_get_value!("indent", "value", String, v);
    let level = m.get("level").and_then(Value::as_u64).unwrap_or(1);
    let pad = "  ".repeat(level as usize);
    let mut out = String::with_capacity(block.len());
    for (ix, line) in block.lines().enumerate() {
        if ix > 0 {
            out.push('\n');
        }
        if !line.is_empty() {
            out.push_str(&pad);
            out.push_str(line);
        }
    }
    Ok(Value::String(out))
}

// ANSI dim, for informational renders on a terminal
fn dim(v: Value, _: HashMap<String, Value>) -> tera::Result<Value> {
    let s: String = try_get_value!("dim", "value", String, v);
    Ok(format!("\x1b[2m{}\x1b[0m", s).into())
}

/// `bridgeIp()`: gateway of the engine bridge network
///
/// Memoized on first evaluation so a render pass costs at most one engine
/// query; the memo never outlives the pass.
fn make_bridge_ip(engine: Option<Arc<dyn EngineClient>>) -> GlobalFn {
    let memo: Mutex<Option<String>> = Mutex::new(None);
    Box::new(move |_args: HashMap<String, Value>| {
        let mut memo = memo.lock().unwrap();
        if memo.is_none() {
            let engine = engine
                .as_ref()
                .ok_or_else(|| tera::Error::from("bridgeIp() needs an engine connection".to_string()))?;
            let ip = engine
                .bridge_ip()
                .map_err(|e| tera::Error::from(format!("bridgeIp() failed: {}", e)))?;
            debug!("Resolved bridge ip {}", ip);
            *memo = Some(ip);
        }
        Ok(Value::String(memo.clone().unwrap()))
    })
}

/// `image(name="app")`: image reference pinned through the variable bag
///
/// Release artifacts contribute `image.<name>` variables; when present
/// they win, otherwise the name passes through untouched.
fn make_image(vars: VariableBag) -> GlobalFn {
    Box::new(move |args: HashMap<String, Value>| {
        let name = match args.get("name").and_then(Value::as_str) {
            Some(n) => n.to_string(),
            None => return Err(tera::Error::from("image() needs a name argument".to_string())),
        };
        let key = format!("image.{}", name);
        Ok(Value::String(vars.get(&key).cloned().unwrap_or(name)))
    })
}

/// Render the raw manifest bytes through `tera` before parsing
///
/// Declared variables live both under `vars.` and, for identifier-safe
/// keys, at the top level. Helpers that perform engine I/O only work when
/// an engine is wired; engine-less render paths (e.g. packaging) fail
/// cleanly if a manifest demands them.
pub fn render(
    raw: &str,
    vars: &VariableBag,
    engine: Option<Arc<dyn EngineClient>>,
) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("manifest", raw)
        .map_err(|e| ErrorKind::ManifestRender(e.to_string()))?;
    tera.register_filter("indent", indent);
    tera.register_filter("dim", dim);
    tera.register_global_function("bridgeIp", make_bridge_ip(engine));
    tera.register_global_function("image", make_image(vars.clone()));

    let ident = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    let mut ctx = Context::new();
    ctx.insert("vars", vars);
    for (k, v) in vars {
        if ident.is_match(k) {
            ctx.insert(k, v);
        }
    }

    let result = tera
        .render("manifest", &ctx)
        .map_err(|e| ErrorKind::ManifestRender(describe(&e)))?;
    let mut xs = vec![];
    for l in result.lines() {
        // trim trailing whitespace (mostly to satisfy yaml linters)
        xs.push(l.trim_end());
    }
    Ok(xs.join("\n"))
}

// flatten the tera error chain into one line
fn describe(e: &tera::Error) -> String {
    let mut msg = e.to_string();
    for cause in e.iter().skip(1) {
        msg = format!("{}: {}", msg, cause);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::render;
    use std::collections::BTreeMap;

    #[test]
    fn plain_passthrough() {
        let out = render("namespace: web", &BTreeMap::new(), None).unwrap();
        assert_eq!(out, "namespace: web");
    }

    #[test]
    fn variables_resolve() {
        let mut vars = BTreeMap::new();
        vars.insert("version".to_string(), "1.2.3".to_string());
        let out = render("image: app:{{ version }}", &vars, None).unwrap();
        assert_eq!(out, "image: app:1.2.3");
        let out = render("image: app:{{ vars.version }}", &vars, None).unwrap();
        assert_eq!(out, "image: app:1.2.3");
    }

    #[test]
    fn image_helper_pins_from_artifacts() {
        let mut vars = BTreeMap::new();
        vars.insert(
            "image.app".to_string(),
            "registry.example.com/app:9.9".to_string(),
        );
        let out = render("image: {{ image(name=\"app\") }}", &vars, None).unwrap();
        assert_eq!(out, "image: registry.example.com/app:9.9");
        let out = render("image: {{ image(name=\"other\") }}", &vars, None).unwrap();
        assert_eq!(out, "image: other");
    }

    #[test]
    fn missing_variable_fails_render() {
        assert!(render("image: {{ nosuch }}", &BTreeMap::new(), None).is_err());
    }

    #[test]
    fn engineless_bridge_ip_fails_cleanly() {
        assert!(render("ip: {{ bridgeIp() }}", &BTreeMap::new(), None).is_err());
    }

    #[test]
    fn indent_filter_nests_by_yaml_steps() {
        let mut vars = BTreeMap::new();
        vars.insert("block".to_string(), "a: 1\n\nb: 2".to_string());
        let out = render("{{ block | indent }}", &vars, None).unwrap();
        assert_eq!(out, "  a: 1\n\n  b: 2");
        let out = render("{{ block | indent(level=2) }}", &vars, None).unwrap();
        assert_eq!(out, "    a: 1\n\n    b: 2");
    }
}
