//! Parameter mapping and resolution.
//!
//! A binding's endpoint declares its parameters by endpoint name. The binding's `param_map` renames
//! them to local state fields (`local -> endpoint`) or computes them. Bindings are compiled into a
//! table keyed by the local name so every later step (field generation, watch registration,
//! resolution) can look things up from the module's point of view.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use statebind_types::{ComputedParam, ParamSource, TypeSpec};

/// One endpoint parameter seen from the binding's module.
#[derive(Debug, Clone)]
pub struct EffectiveParam {
    /// Endpoint parameter name the value is sent as.
    pub param: String,
    pub spec: TypeSpec,
    pub computed: Option<ComputedParam>,
}

/// Inverts the field entries of a `param_map` into `endpoint param -> local field`.
pub fn reverse_map(param_map: &IndexMap<String, ParamSource>) -> IndexMap<String, String> {
    param_map
        .iter()
        .filter_map(|(local, source)| match source {
            ParamSource::Field(param) => Some((param.clone(), local.clone())),
            ParamSource::Computed(_) => None,
        })
        .collect()
}

/// Re-keys an endpoint's type table by local name. Exactly one entry per endpoint parameter.
///
/// Parameters with a computed `param_map` entry (keyed by the endpoint name) keep their endpoint
/// name and carry the computation.
pub fn map_endpoint_types(
    param_map: &IndexMap<String, ParamSource>,
    type_map: &IndexMap<String, TypeSpec>,
) -> IndexMap<String, EffectiveParam> {
    let reversed = reverse_map(param_map);
    type_map
        .iter()
        .map(|(param, spec)| {
            let computed = match param_map.get(param) {
                Some(ParamSource::Computed(computed)) => Some(computed.clone()),
                _ => None,
            };
            let local = match (&computed, reversed.get(param)) {
                (None, Some(local)) => local.clone(),
                _ => param.clone(),
            };
            (
                local,
                EffectiveParam {
                    param: param.clone(),
                    spec: spec.clone(),
                    computed,
                },
            )
        })
        .collect()
}

/// A resolved value that does not have its declared shape.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatch {
    pub field: String,
    pub expected: String,
    pub actual: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamResolution {
    /// Every parameter is set (or the output is itself a parameter). Keyed by endpoint name.
    Ready {
        params: Map<String, Value>,
        mismatches: Vec<TypeMismatch>,
    },
    /// `field` is unset, so the binding must not run.
    Blocked { field: String, mismatches: Vec<TypeMismatch> },
    /// The output is the binding's only (non-computed) parameter.
    SelfReference,
}

impl ParamResolution {
    pub fn mismatches(&self) -> &[TypeMismatch] {
        match self {
            Self::Ready { mismatches, .. } | Self::Blocked { mismatches, .. } => mismatches,
            Self::SelfReference => &[],
        }
    }
}

/// Resolves a binding's parameters against its module's state and evaluated getters.
///
/// Unset parameters block the binding unless the output itself is one of the parameters, in which
/// case the value is sent as is (storage-style read/write endpoints rely on this).
pub fn resolve_params(
    params: &IndexMap<String, EffectiveParam>,
    output: &str,
    local_state: &Value,
    getters: &Map<String, Value>,
) -> ParamResolution {
    if params.len() == 1
        && let Some((local, param)) = params.first()
        && local == output
        && param.computed.is_none()
    {
        return ParamResolution::SelfReference;
    }

    let mut resolved = Map::new();
    let mut mismatches = Vec::new();
    let mut blocked = None;
    for (local, param) in params {
        let value = match &param.computed {
            Some(computed) => computed.compute(local_state, getters),
            None => local_state.get(local).cloned().unwrap_or(Value::Null),
        };
        if !param.spec.is_type_match(&value) {
            mismatches.push(TypeMismatch {
                field: local.clone(),
                expected: param.spec.name().to_string(),
                actual: value.clone(),
            });
        }
        if blocked.is_none() && param.spec.is_unset(&value) {
            blocked = Some(local.clone());
        }
        resolved.insert(param.param.clone(), value);
    }

    match blocked {
        Some(field) if !params.contains_key(output) => ParamResolution::Blocked { field, mismatches },
        _ => ParamResolution::Ready {
            params: resolved,
            mismatches,
        },
    }
}
