//! WebAssembly data source.
//!
//! Bindings call exported functions of a module file. Parameters are passed positionally in the
//! endpoint's `order`; the call itself is delegated to a [`WasmInvoker`] so embedders can use any
//! runtime. With the `wasmtime` feature, [`WasmtimeInvoker`] runs numeric exports directly.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{Map, Value};
use statebind_types::Endpoint;

use super::{DataSource, SourceArgs, unexpected_args};

/// One call of an exported function.
#[derive(Debug, Clone, PartialEq)]
pub struct WasmCall {
    pub file: String,
    pub func: String,
    pub args: Vec<Value>,
}

/// Runs a [`WasmCall`].
#[async_trait]
pub trait WasmInvoker: Send + Sync {
    async fn invoke(&self, call: &WasmCall) -> anyhow::Result<Value>;
}

/// Invoker used when no runtime is configured. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedWasm;

#[async_trait]
impl WasmInvoker for UnsupportedWasm {
    async fn invoke(&self, call: &WasmCall) -> anyhow::Result<Value> {
        bail!("no WebAssembly runtime configured; cannot call '{}' in '{}'", call.func, call.file)
    }
}

/// Module file used when none is configured.
pub const DEFAULT_WASM_FILE: &str = "application.wasm";

pub struct WasmDataSource {
    file: String,
    invoker: Arc<dyn WasmInvoker>,
}

impl WasmDataSource {
    pub fn new(invoker: Arc<dyn WasmInvoker>) -> Self {
        Self {
            file: DEFAULT_WASM_FILE.to_string(),
            invoker,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }
}

#[async_trait]
impl DataSource for WasmDataSource {
    fn kind(&self) -> &'static str {
        "wasm"
    }

    fn state(&self) -> Map<String, Value> {
        let mut state = Map::new();
        state.insert("wasm_file".into(), Value::String(self.file.clone()));
        state
    }

    /// `func` defaults to the endpoint name and `order` to no arguments.
    fn apply_defaults(&self, name: &str, endpoint: &mut Endpoint) {
        endpoint.func.get_or_insert_with(|| name.to_string());
        endpoint.order.get_or_insert_with(Vec::new);
        endpoint.apply_base_defaults();
    }

    fn args(&self, bind_state: &Value, params: &Map<String, Value>, endpoint: &Endpoint) -> anyhow::Result<SourceArgs> {
        let file = bind_state
            .get("wasm_file")
            .and_then(Value::as_str)
            .filter(|file| !file.is_empty())
            .unwrap_or(&self.file)
            .to_string();
        let Some(func) = endpoint.func.clone() else {
            bail!("WebAssembly endpoint has no function name");
        };
        let args = endpoint
            .order
            .iter()
            .flatten()
            .map(|param| params.get(param).cloned().unwrap_or(Value::Null))
            .collect();
        Ok(SourceArgs::Wasm(WasmCall { file, func, args }))
    }

    async fn module(&self, args: SourceArgs) -> anyhow::Result<Value> {
        let SourceArgs::Wasm(call) = args else {
            return Err(unexpected_args("wasm", &args));
        };
        self.invoker.invoke(&call).await
    }
}

#[cfg(feature = "wasmtime")]
pub use runtime::WasmtimeInvoker;

#[cfg(feature = "wasmtime")]
mod runtime {
    use std::{
        collections::HashMap,
        sync::{Mutex, PoisonError},
    };

    use anyhow::{Context, anyhow, bail};
    use async_trait::async_trait;
    use serde_json::{Number, Value};
    use tracing::debug;
    use wasmtime::{Engine, Instance, Module, Store, Val, ValType};

    use super::{WasmCall, WasmInvoker};

    /// Runs exports of modules without imports. Arguments and results must be numeric.
    #[derive(Default)]
    pub struct WasmtimeInvoker {
        engine: Engine,
        modules: Mutex<HashMap<String, Module>>,
    }

    impl WasmtimeInvoker {
        pub fn new() -> Self {
            Self::default()
        }

        fn module(&self, file: &str) -> anyhow::Result<Module> {
            let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(module) = modules.get(file) {
                return Ok(module.clone());
            }
            debug!(file, "compiling WebAssembly module");
            let module = Module::from_file(&self.engine, file).with_context(|| format!("failed to load WebAssembly module '{file}'"))?;
            modules.insert(file.to_string(), module.clone());
            Ok(module)
        }

        fn call(&self, call: &WasmCall) -> anyhow::Result<Value> {
            let module = self.module(&call.file)?;
            let mut store = Store::new(&self.engine, ());
            let instance = Instance::new(&mut store, &module, &[]).with_context(|| format!("failed to instantiate '{}'", call.file))?;
            let func = instance
                .get_func(&mut store, &call.func)
                .ok_or_else(|| anyhow!("'{}' does not export function '{}'", call.file, call.func))?;
            let ty = func.ty(&store);

            let params = ty
                .params()
                .zip(call.args.iter().chain(std::iter::repeat(&Value::Null)))
                .map(|(ty, arg)| to_val(&ty, arg))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let mut results = ty.results().map(|ty| zero_val(&ty)).collect::<anyhow::Result<Vec<_>>>()?;
            func.call(&mut store, &params, &mut results)
                .with_context(|| format!("call to '{}' trapped", call.func))?;

            Ok(match results.len() {
                0 => Value::Null,
                1 => from_val(&results[0]),
                _ => Value::Array(results.iter().map(from_val).collect()),
            })
        }
    }

    #[async_trait]
    impl WasmInvoker for WasmtimeInvoker {
        async fn invoke(&self, call: &WasmCall) -> anyhow::Result<Value> {
            self.call(call)
        }
    }

    fn to_val(ty: &ValType, arg: &Value) -> anyhow::Result<Val> {
        let number = arg.as_f64().or_else(|| arg.as_bool().map(f64::from)).unwrap_or(0.0);
        Ok(match ty {
            ValType::I32 => {
                let wide = arg.as_i64().unwrap_or(number as i64);
                Val::I32(i32::try_from(wide).map_err(|_| anyhow!("argument {arg} does not fit in an i32 parameter"))?)
            }
            ValType::I64 => Val::I64(arg.as_i64().unwrap_or(number as i64)),
            ValType::F32 => Val::F32((number as f32).to_bits()),
            ValType::F64 => Val::F64(number.to_bits()),
            other => bail!("unsupported WebAssembly parameter type {other}"),
        })
    }

    fn zero_val(ty: &ValType) -> anyhow::Result<Val> {
        Ok(match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0),
            ValType::F64 => Val::F64(0),
            other => bail!("unsupported WebAssembly result type {other}"),
        })
    }

    fn from_val(val: &Val) -> Value {
        match val {
            Val::I32(value) => Value::from(*value),
            Val::I64(value) => Value::from(*value),
            Val::F32(bits) => Number::from_f64(f64::from(f32::from_bits(*bits))).map_or(Value::Null, Value::Number),
            Val::F64(bits) => Number::from_f64(f64::from_bits(*bits)).map_or(Value::Null, Value::Number),
            _ => Value::Null,
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn i32_parameters_reject_out_of_range_integers() {
            assert!(matches!(to_val(&ValType::I32, &json!(7)).expect("small integer"), Val::I32(7)));
            assert!(matches!(to_val(&ValType::I32, &json!(-7)).expect("negative integer"), Val::I32(-7)));
            let error = to_val(&ValType::I32, &json!(1_i64 << 40)).expect_err("wide integer");
            assert!(error.to_string().contains("does not fit"));
            assert!(matches!(to_val(&ValType::I64, &json!(1_i64 << 40)).expect("i64"), Val::I64(value) if value == 1 << 40));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<WasmCall>>,
    }

    #[async_trait]
    impl WasmInvoker for Recording {
        async fn invoke(&self, call: &WasmCall) -> anyhow::Result<Value> {
            self.calls.lock().expect("lock").push(call.clone());
            Ok(json!(call.args.len()))
        }
    }

    #[tokio::test]
    async fn passes_params_positionally() {
        let invoker = Arc::new(Recording::default());
        let source = WasmDataSource::new(invoker.clone()).with_file("math.wasm");
        let mut endpoint = Endpoint::wasm("add");
        endpoint.order = Some(vec!["a".into(), "b".into(), "c".into()]);
        source.apply_defaults("sum", &mut endpoint);

        let params = json!({"b": 2, "a": 1}).as_object().cloned().expect("object");
        let args = source.args(&Value::Object(source.state()), &params, &endpoint).expect("args");
        assert_eq!(source.module(args).await.expect("call"), json!(3));

        let calls = invoker.calls.lock().expect("lock");
        assert_eq!(
            calls[0],
            WasmCall {
                file: "math.wasm".into(),
                func: "add".into(),
                args: vec![json!(1), json!(2), Value::Null],
            }
        );
    }

    #[test]
    fn defaults_name_the_function_after_the_endpoint() {
        let source = WasmDataSource::new(Arc::new(UnsupportedWasm));
        let mut endpoint = Endpoint::default();
        source.apply_defaults("checksum", &mut endpoint);
        assert_eq!(endpoint.func.as_deref(), Some("checksum"));
        assert_eq!(endpoint.order, Some(Vec::new()));
    }

    #[tokio::test]
    async fn unsupported_runtime_reports_the_call() {
        let call = WasmCall {
            file: "app.wasm".into(),
            func: "run".into(),
            args: Vec::new(),
        };
        let error = UnsupportedWasm.invoke(&call).await.expect_err("no runtime");
        assert!(error.to_string().contains("'run'"));
    }
}
