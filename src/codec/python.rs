//! Python backend for the source-text generation strategy.

use serde_json::Value;

use super::{CodeGen, Payload, TrackerSpec};
use crate::error::{Error, Result};

/// Generates Python source against the helpers installed by the kernel
/// bootstrap (`__nbt_encode` / `__nbt_decode`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonCodeGen;

/// A Python string literal for arbitrary text. JSON string escaping is a
/// subset of Python's, so the JSON form is reused directly.
fn str_literal(text: &str) -> String {
    serde_json::to_string(text).expect("string serialization is infallible")
}

impl CodeGen for PythonCodeGen {
    fn literal(&self, value: &Value) -> Result<String> {
        let text = serde_json::to_string(value).map_err(|e| Error::encoding(e.to_string()))?;
        Ok(format!("__nbt_decode({})", str_literal(&text)))
    }

    fn payload_literal(&self, payload: &Payload) -> String {
        format!("__nbt_decode({})", str_literal(payload.as_text()))
    }

    fn attr(&self, parent: &str, name: &str) -> String {
        format!("{parent}.{name}")
    }

    fn item(&self, parent: &str, key: &str) -> String {
        format!("{parent}[{key}]")
    }

    fn call(&self, target: &str, args: &[String], kwargs: &[(String, String)]) -> String {
        let mut parts: Vec<String> = args.to_vec();
        parts.extend(kwargs.iter().map(|(k, v)| format!("{k}={v}")));
        format!("{target}({})", parts.join(", "))
    }

    fn assign(&self, name: &str, expr: &str) -> String {
        format!("{name} = {expr}")
    }

    fn encode_expr(&self, expr: &str) -> String {
        format!("__nbt_encode({expr})")
    }

    fn length(&self, expr: &str) -> String {
        format!("len({expr})")
    }

    fn tracker_source(&self, spec: &TrackerSpec<'_>) -> String {
        let include_set = if spec.parameters.is_empty() {
            "set()".to_string()
        } else {
            let items: Vec<String> = spec.parameters.iter().map(|p| str_literal(p)).collect();
            format!("{{{}}}", items.join(", "))
        };
        let py_bool = |b: bool| if b { "True" } else { "False" };

        format!(
            r#"class {cls}:
    def __init__(self, fun):
        self._include = {include_set}
        self._include_all = {include_all}
        self._track_returns = {track_returns}
        self.fun = fun
        self.calls = []

        import inspect
        from inspect import Parameter
        self._defaults = {{}}
        self._positions = []
        self._names = set()
        self._var_positional = None
        self._var_keyword = None
        for index, param in enumerate(inspect.signature(fun).parameters.values()):
            if param.default is not Parameter.empty:
                self._defaults[param.name] = param.default
            if param.kind in (Parameter.POSITIONAL_OR_KEYWORD, Parameter.POSITIONAL_ONLY):
                self._positions.append(param.name)
            if param.kind in (Parameter.POSITIONAL_OR_KEYWORD, Parameter.KEYWORD_ONLY):
                self._names.add(param.name)
            if param.kind == Parameter.VAR_POSITIONAL:
                self._var_positional = index
                self._positions.append(param.name)
            if param.kind == Parameter.VAR_KEYWORD:
                self._var_keyword = param.name

    def _bind(self, args, kwargs):
        bound = {{}}
        for i, val in enumerate(args):
            name = self._positions[min(i, len(self._positions) - 1)]
            if self._var_positional is not None and i >= self._var_positional:
                bound.setdefault(name, []).append(val)
            else:
                bound[name] = val
        for name, val in kwargs.items():
            if name in self._names:
                bound[name] = val
            elif self._var_keyword is not None:
                bound.setdefault(self._var_keyword, {{}})[name] = val
        for name, val in self._defaults.items():
            if name not in bound:
                bound[name] = val
        if not self._include_all:
            for name in list(bound):
                if name not in self._include:
                    del bound[name]
        return bound

    def wrapper(self):
        def wrapped(*args, **kwargs):
            bound = self._bind(args, kwargs)
            try:
                result = self.fun(*args, **kwargs)
            except BaseException:
                self.calls.append([list(bound.items()), None])
                raise
            self.calls.append([list(bound.items()), result if self._track_returns else None])
            return result
        return wrapped

    def clear(self):
        self.calls = []

{inst} = {cls}({target})
{target} = {inst}.wrapper()
"#,
            cls = spec.class_name,
            inst = spec.instance_name,
            target = spec.target,
            include_set = include_set,
            include_all = py_bool(spec.all_parameters),
            track_returns = py_bool(spec.return_values),
        )
    }
}
