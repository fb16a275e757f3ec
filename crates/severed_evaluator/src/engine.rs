use std::collections::BTreeMap;
use std::sync::{Arc, Once};

use severed_core::types::EXPORT_PREFIX;
use v8::{
  Array, Context, ContextScope, CreateParams, Exception, Function, FunctionCallbackArguments,
  Isolate, Local, Object, ReturnValue, Script, ScriptOrigin, String as V8String, V8,
  new_default_platform,
};

use crate::{EvalError, RequireHook};

/// In-memory CommonJS loader: caches hook-resolved modules by id and wires
/// their nested requires back through the host resolve function.
const PRELUDE: &str = r#"var __severed_module_cache__ = Object.create(null);
function __severed_require_module__(specifier, importer) {
  var resolved = __severed_resolve_module__(specifier, importer);
  var id = resolved[0];
  var cached = __severed_module_cache__[id];
  if (cached) return cached.exports;
  var mod = { exports: {} };
  __severed_module_cache__[id] = mod;
  var factory = new Function("module", "exports", "require", resolved[1]);
  factory(mod, mod.exports, function (spec) { return __severed_require_module__(spec, id); });
  return mod.exports;
}
"#;

struct RequireState {
  hook: Arc<dyn RequireHook>,
}

/// Host function backing the loader: resolves `(specifier, importer)` through
/// the hook and returns `[id, code]`, or throws the hook's error.
fn resolve_module_callback<'s, 'i>(
  scope: &mut v8::PinScope<'s, 'i>,
  args: FunctionCallbackArguments,
  mut ret_val: ReturnValue,
) {
  let specifier = args.get(0).to_rust_string_lossy(scope);
  let importer = args.get(1).to_rust_string_lossy(scope);

  let hook = match scope.get_slot::<RequireState>() {
    Some(state) => state.hook.clone(),
    None => {
      let undefined = v8::undefined(scope);
      ret_val.set(undefined.into());
      return;
    }
  };

  match hook.require(&specifier, &importer) {
    Ok(resolved) => {
      let Some(id) = V8String::new(scope, &resolved.id) else {
        return;
      };
      let Some(code) = V8String::new(scope, &resolved.code) else {
        return;
      };
      let pair = Array::new(scope, 2);
      let _ = pair.set_index(scope, 0, id.into());
      let _ = pair.set_index(scope, 1, code.into());
      ret_val.set(pair.into());
    }
    Err(error) => {
      let message = error.to_string();
      if let Some(text) = V8String::new(scope, &message) {
        let exception = Exception::error(scope, text);
        scope.throw_exception(exception);
      }
    }
  }
}

fn init_platform() {
  static START: Once = Once::new();
  START.call_once(|| {
    let platform = new_default_platform(0, false).make_shared();
    V8::initialize_platform(platform);
    V8::initialize();
  });
}

fn evaluation_error(source_id: &str, cause: impl Into<String>) -> EvalError {
  EvalError::Evaluation {
    id: source_id.to_string(),
    cause: cause.into(),
  }
}

/// Compile and run one script inside a try-catch scope; evaluates to
/// `Result<Local<Value>, String>` with thrown exceptions rendered as
/// messages.
macro_rules! run_script {
  ($tc:ident, $code:expr, $url:expr) => {{
    match (
      V8String::new($tc, $code),
      V8String::new($tc, $url),
    ) {
      (Some(code), Some(name)) => {
        let origin = ScriptOrigin::new(
          $tc,
          name.into(),
          0,
          0,
          false,
          0,
          None,
          false,
          false,
          false,
          None,
        );
        match Script::compile($tc, code, Some(&origin)).and_then(|script| script.run($tc)) {
          Some(value) => Ok(value),
          None if $tc.has_caught() => {
            let cause = $tc
              .exception()
              .and_then(|exception| exception.to_string($tc))
              .map(|text| text.to_rust_string_lossy($tc))
              .or_else(|| {
                $tc
                  .message()
                  .map(|message| message.get($tc).to_rust_string_lossy($tc))
              })
              .unwrap_or_else(|| "uncaught exception".to_string());
            Err(cause)
          }
          None => Err("script execution failed".to_string()),
        }
      }
      _ => Err("failed to allocate v8 source string".to_string()),
    }
  }};
}

pub(crate) fn run_and_harvest(
  script: &str,
  source_id: &str,
  hook: Arc<dyn RequireHook>,
) -> Result<BTreeMap<usize, String>, EvalError> {
  init_platform();

  let mut isolate = Isolate::new(CreateParams::default());
  isolate.set_slot(RequireState { hook });

  let isolate_ref: &mut Isolate = &mut isolate;
  v8::scope!(let scope, isolate_ref);
  let context: Local<Context> = Context::new(scope, Default::default());
  let scope = &mut ContextScope::new(scope, context);
  let global = context.global(scope);

  let resolve_fn = Function::builder(resolve_module_callback)
    .build(scope)
    .ok_or_else(|| evaluation_error(source_id, "failed to create resolver binding"))?;
  let resolve_key = V8String::new(scope, "__severed_resolve_module__")
    .ok_or_else(|| evaluation_error(source_id, "failed to allocate v8 string"))?;
  let _ = global.set(scope, resolve_key.into(), resolve_fn.into());

  v8::tc_scope!(let tc, scope);

  run_script!(tc, PRELUDE, "severed:prelude")
    .map_err(|cause| evaluation_error(source_id, cause))?;

  // The module wrapper gives the script `module`/`exports`/`require`, with
  // the original file id as the top-level resolution context, and completes
  // to the final `module.exports`.
  let importer = serde_json::Value::String(source_id.to_string()).to_string();
  let wrapper = format!(
    "(function() {{\nvar module = {{ exports: {{}} }};\n(function(module, exports, require) {{\n{script}\n}})(module, module.exports, function (specifier) {{ return __severed_require_module__(specifier, {importer}); }});\nreturn module.exports;\n}})()"
  );

  let completion =
    run_script!(tc, &wrapper, source_id).map_err(|cause| evaluation_error(source_id, cause))?;

  let exports = Local::<Object>::try_from(completion)
    .map_err(|_| evaluation_error(source_id, "script did not produce an exports object"))?;
  let names = exports
    .get_own_property_names(tc, Default::default())
    .ok_or_else(|| evaluation_error(source_id, "failed to enumerate exports"))?;

  let mut values = BTreeMap::new();
  for position in 0..names.length() {
    let Some(key) = names.get_index(tc, position) else {
      continue;
    };
    let name = key.to_rust_string_lossy(tc);
    let Some(suffix) = name.strip_prefix(EXPORT_PREFIX) else {
      continue;
    };
    let Ok(index) = suffix.parse::<usize>() else {
      continue;
    };
    let Some(value) = exports.get(tc, key) else {
      continue;
    };
    if !value.is_string() {
      return Err(EvalError::NonString);
    }
    values.insert(index, value.to_rust_string_lossy(tc));
  }

  Ok(values)
}
