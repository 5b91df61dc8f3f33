//! Bridge WASM <-> JavaScript cho lớp giao diện nhập liệu encounter.

use encounter_core::{
    ControlNode, FormDefinition, FormMetadata, Observation, ScriptContext, ScriptEncoding,
    ScriptExecutor, ScriptFailure, TransformConfig,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, Serializer};
use wasm_bindgen::{prelude::*, JsCast};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsTransformConfig {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    attachment_reference_keys: Option<Vec<String>>,
    #[serde(default)]
    script_encoding: Option<ScriptEncoding>,
    #[serde(default)]
    strict_datatypes: Option<bool>,
}

impl From<JsTransformConfig> for TransformConfig {
    fn from(cfg: JsTransformConfig) -> Self {
        let mut base = TransformConfig::default();
        if cfg.namespace.is_some() {
            base.namespace = cfg.namespace;
        }
        if let Some(keys) = cfg.attachment_reference_keys {
            base.attachment_reference_keys = keys;
        }
        if let Some(encoding) = cfg.script_encoding {
            base.script_encoding = encoding;
        }
        if let Some(strict) = cfg.strict_datatypes {
            base.strict_datatypes = strict;
        }
        base
    }
}

#[wasm_bindgen(js_name = formToObservations)]
pub fn form_to_observations(
    controls: JsValue,
    form: JsValue,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    init();
    let controls: Vec<ControlNode> = read(controls, "cây control")?;
    let form: FormDefinition = read(form, "định nghĩa form")?;
    let cfg = read_config(config)?;

    let observations = encounter_forms::form_to_observations_now(&controls, &form, &cfg);
    write(&observations)
}

#[wasm_bindgen(js_name = observationsToForm)]
pub fn observations_to_form(observations: JsValue, form: JsValue) -> Result<JsValue, JsValue> {
    init();
    let observations: Vec<Observation> = read(observations, "danh sách observation")?;
    let form: FormDefinition = read(form, "định nghĩa form")?;

    write(&encounter_forms::observations_to_form(&observations, &form))
}

/// Trả về danh sách mới; danh sách đầu vào phía JS không bị sửa.
#[wasm_bindgen(js_name = extractNotes)]
pub fn extract_notes(form_state: JsValue, observations: JsValue) -> Result<JsValue, JsValue> {
    init();
    let state: serde_json::Value = read(form_state, "trạng thái form")?;
    let mut observations: Vec<Observation> = read(observations, "danh sách observation")?;

    encounter_forms::extract_notes(&state, &mut observations);
    write(&observations)
}

/// `executor(formState, script, patientId, context)` chạy script trong sandbox
/// phía JS; có thể trả về mảng observation hoặc sửa `context.observations`.
#[wasm_bindgen(js_name = runSaveScript)]
pub fn run_save_script(
    metadata: JsValue,
    observations: JsValue,
    patient_id: String,
    form_state: Option<JsValue>,
    executor: js_sys::Function,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    init();
    let metadata: FormMetadata = read(metadata, "metadata form")?;
    let observations: Vec<Observation> = read(observations, "danh sách observation")?;
    let state: Option<serde_json::Value> = match form_state {
        Some(js_state) if !js_state.is_undefined() && !js_state.is_null() => {
            Some(read(js_state, "trạng thái form")?)
        }
        _ => None,
    };
    let cfg = read_config(config)?;

    let result = encounter_forms::run_save_script(
        &metadata,
        &observations,
        &patient_id,
        state.as_ref(),
        &JsExecutor { function: executor },
        &cfg,
    )
    .map_err(|err| JsValue::from_str(&err.to_string()))?;

    write(&result)
}

struct JsExecutor {
    function: js_sys::Function,
}

impl ScriptExecutor for JsExecutor {
    fn execute(
        &self,
        form_state: Option<&serde_json::Value>,
        script: &str,
        patient_id: &str,
        context: &mut ScriptContext,
    ) -> Result<Option<Vec<Observation>>, ScriptFailure> {
        let js_state = match form_state {
            Some(state) => write(state).map_err(failure_from_js)?,
            None => JsValue::UNDEFINED,
        };
        let js_context = write(&*context).map_err(failure_from_js)?;

        let args = js_sys::Array::of4(
            &js_state,
            &JsValue::from_str(script),
            &JsValue::from_str(patient_id),
            &js_context,
        );
        let returned = self
            .function
            .apply(&JsValue::NULL, &args)
            .map_err(failure_from_js)?;

        // Script có thể đã sửa trực tiếp bản sao trong context.
        let mutated = js_sys::Reflect::get(&js_context, &JsValue::from_str("observations"))
            .map_err(failure_from_js)?;
        context.observations = from_value(mutated)
            .map_err(|err| ScriptFailure::Error(format!("context.observations không hợp lệ: {err}")))?;

        if !js_sys::Array::is_array(&returned) {
            return Ok(None);
        }
        from_value(returned)
            .map(Some)
            .map_err(|err| ScriptFailure::Error(format!("Kết quả script không hợp lệ: {err}")))
    }
}

fn failure_from_js(value: JsValue) -> ScriptFailure {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return ScriptFailure::Error(String::from(error.message()));
    }
    if let Some(text) = value.as_string() {
        return ScriptFailure::Text(text);
    }
    match from_value::<serde_json::Value>(value) {
        Ok(other) => ScriptFailure::Value(other),
        Err(_) => ScriptFailure::Unknown,
    }
}

fn init() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

fn read<T: DeserializeOwned>(value: JsValue, what: &str) -> Result<T, JsValue> {
    from_value(value).map_err(|err| JsValue::from_str(&format!("Không đọc được {what}: {err}")))
}

fn read_config(config: Option<JsValue>) -> Result<TransformConfig, JsValue> {
    match config {
        Some(js_cfg) if !js_cfg.is_undefined() && !js_cfg.is_null() => {
            let cfg: JsTransformConfig = read(js_cfg, "config")?;
            Ok(TransformConfig::from(cfg))
        }
        _ => Ok(TransformConfig::default()),
    }
}

/// Object JS thuần (không dùng `Map`) để phía UI đọc trực tiếp.
fn write<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|err| JsValue::from_str(&format!("Không serialize kết quả: {err}")))
}
