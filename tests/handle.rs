use kornia_describer::{
    Accelerator, DescribeError, DescriberConfig, DescriptionModel, DescriptionOutput,
    DescriptionRequest, Device, ImageReadError, ModelHandle, ModelHandleState, ModelLoader,
    Precision, RuntimeProfile,
};
use std::{
    cell::RefCell,
    path::{Path, PathBuf},
    rc::Rc,
};

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
struct MockError(String);

#[derive(Default)]
struct Calls {
    loads: usize,
    runs: usize,
    prompts: Vec<String>,
    max_new_tokens: Vec<usize>,
    profiles: Vec<RuntimeProfile>,
}

struct MockModel {
    calls: Rc<RefCell<Calls>>,
    reply: String,
    fail: bool,
}

impl DescriptionModel for MockModel {
    type Error = MockError;

    fn run(&mut self, request: DescriptionRequest) -> Result<DescriptionOutput, MockError> {
        let mut calls = self.calls.borrow_mut();
        calls.runs += 1;
        calls.prompts.push(request.prompt.clone());
        calls.max_new_tokens.push(request.max_new_tokens);
        if self.fail {
            return Err(MockError("out of memory".to_string()));
        }
        let text = self
            .reply
            .split(' ')
            .take(request.max_new_tokens)
            .collect::<Vec<_>>()
            .join(" ");
        Ok(DescriptionOutput { text })
    }
}

struct MockLoader {
    calls: Rc<RefCell<Calls>>,
    failures_left: usize,
    reply: String,
    fail_generation: bool,
}

impl MockLoader {
    fn new(reply: &str) -> (Self, Rc<RefCell<Calls>>) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let loader = Self {
            calls: calls.clone(),
            failures_left: 0,
            reply: reply.to_string(),
            fail_generation: false,
        };
        (loader, calls)
    }
}

impl ModelLoader for MockLoader {
    type Model = MockModel;
    type Error = MockError;

    fn load(&mut self, model_id: &str, profile: RuntimeProfile) -> Result<MockModel, MockError> {
        let mut calls = self.calls.borrow_mut();
        calls.loads += 1;
        calls.profiles.push(profile);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(MockError(format!("{model_id} is unreachable")));
        }
        Ok(MockModel {
            calls: self.calls.clone(),
            reply: self.reply.clone(),
            fail: self.fail_generation,
        })
    }
}

fn cpu_handle(loader: MockLoader) -> ModelHandle<MockLoader> {
    ModelHandle::with_accelerators(loader, DescriberConfig::default(), Vec::new())
}

fn write_shirt(dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let file_path = dir.join("images.jpeg");
    image::RgbImage::from_pixel(64, 64, image::Rgb([210, 25, 30]))
        .save_with_format(&file_path, image::ImageFormat::Jpeg)?;
    Ok(file_path)
}

#[test]
fn ensure_loaded_acquires_once() -> Result<(), DescribeError> {
    let (loader, calls) = MockLoader::new("red t-shirt");
    let mut handle = cpu_handle(loader);
    assert_eq!(handle.state(), ModelHandleState::Uninitialized);
    assert_eq!(handle.profile(), None);

    handle.ensure_loaded("blip")?;
    handle.ensure_loaded("blip")?;

    assert_eq!(calls.borrow().loads, 1);
    assert_eq!(handle.state(), ModelHandleState::Ready);
    assert_eq!(handle.profile(), Some(RuntimeProfile::CPU));
    Ok(())
}

#[test]
fn loaded_model_is_kept_for_other_ids() -> Result<(), DescribeError> {
    let (loader, calls) = MockLoader::new("red t-shirt");
    let mut handle = cpu_handle(loader);

    handle.ensure_loaded("blip")?;
    handle.ensure_loaded("another/model")?;

    assert_eq!(calls.borrow().loads, 1);
    Ok(())
}

#[test]
fn gpu_handle_loads_in_half_precision() -> Result<(), DescribeError> {
    let (loader, calls) = MockLoader::new("red t-shirt");
    let mut handle = ModelHandle::with_accelerators(
        loader,
        DescriberConfig::default(),
        vec![Accelerator::Cuda(0)],
    );

    handle.ensure_loaded("blip")?;

    let profile = calls.borrow().profiles[0];
    assert_eq!(profile.device, Device::Gpu(0));
    assert_eq!(profile.precision, Precision::F16);
    Ok(())
}

#[test]
fn describe_returns_trimmed_text() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let image_path = write_shirt(tmp_dir.path())?;

    let (loader, calls) = MockLoader::new("  red cotton t-shirt with logo \n");
    let mut handle = cpu_handle(loader);

    let description = handle.describe(&image_path, "Describe this clothing item:", 50)?;
    assert_eq!(description, "red cotton t-shirt with logo");
    assert!(description.contains("shirt"));

    let calls = calls.borrow();
    assert_eq!(calls.loads, 1);
    assert_eq!(calls.runs, 1);
    assert_eq!(calls.prompts, ["Describe this clothing item:"]);
    Ok(())
}

#[test]
fn describe_forwards_token_cap() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let image_path = write_shirt(tmp_dir.path())?;

    let (loader, calls) = MockLoader::new("red cotton t-shirt with logo");
    let mut handle = cpu_handle(loader);

    let description = handle.describe(&image_path, "a photo of", 2)?;
    assert_eq!(description, "red cotton");
    assert_eq!(calls.borrow().max_new_tokens, [2]);
    Ok(())
}

#[test]
fn describe_default_uses_configured_cap() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let image_path = write_shirt(tmp_dir.path())?;

    let (loader, calls) = MockLoader::new("red t-shirt");
    let config = DescriberConfig {
        max_new_tokens: 7,
        ..DescriberConfig::default()
    };
    let mut handle = ModelHandle::with_accelerators(loader, config, Vec::new());

    handle.describe_default(&image_path, "a photo of")?;
    assert_eq!(calls.borrow().max_new_tokens, [7]);

    let mut default_handle = cpu_handle(MockLoader::new("red t-shirt").0);
    assert_eq!(default_handle.config().max_new_tokens, 50);
    default_handle.describe_default(&image_path, "a photo of")?;
    Ok(())
}

#[test]
fn describe_passes_empty_prompt_through() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let image_path = write_shirt(tmp_dir.path())?;

    let (loader, calls) = MockLoader::new("red t-shirt");
    let mut handle = cpu_handle(loader);

    handle.describe_default(&image_path, "")?;
    assert_eq!(calls.borrow().prompts, [""]);
    Ok(())
}

#[test]
fn missing_image_does_not_run_the_model() {
    let (loader, calls) = MockLoader::new("red t-shirt");
    let mut handle = cpu_handle(loader);

    let err = handle
        .describe("no/such/images.jpeg", "Describe this clothing item:", 50)
        .unwrap_err();

    assert!(matches!(
        err,
        DescribeError::Image(ImageReadError::NotFound(_))
    ));
    assert_eq!(calls.borrow().runs, 0);
}

#[test]
fn corrupted_image_is_an_image_error() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let image_path = tmp_dir.path().join("images.jpeg");
    std::fs::write(&image_path, [0xFF, 0xD8, 0x00, 0x13, 0x37])?;

    let (loader, calls) = MockLoader::new("red t-shirt");
    let mut handle = cpu_handle(loader);

    let err = handle.describe(&image_path, "a photo of", 50).unwrap_err();
    assert!(err.is_image());
    assert_eq!(calls.borrow().runs, 0);
    Ok(())
}

#[test]
fn failed_load_is_retried() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let image_path = write_shirt(tmp_dir.path())?;

    let (mut loader, calls) = MockLoader::new("red t-shirt");
    loader.failures_left = 1;
    let mut handle = cpu_handle(loader);

    let err = handle.describe(&image_path, "a photo of", 50).unwrap_err();
    assert!(err.is_load());
    assert!(err.to_string().contains("is unreachable"));
    assert_eq!(handle.state(), ModelHandleState::Uninitialized);
    assert_eq!(handle.load_failures(), 1);

    let description = handle.describe(&image_path, "a photo of", 50)?;
    assert_eq!(description, "red t-shirt");
    assert_eq!(calls.borrow().loads, 2);
    assert_eq!(handle.state(), ModelHandleState::Ready);
    Ok(())
}

#[test]
fn model_failure_is_a_generation_error() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempfile::tempdir()?;
    let image_path = write_shirt(tmp_dir.path())?;

    let (mut loader, _calls) = MockLoader::new("red t-shirt");
    loader.fail_generation = true;
    let mut handle = cpu_handle(loader);

    let err = handle.describe(&image_path, "a photo of", 50).unwrap_err();
    assert!(err.is_generation());
    assert!(err.to_string().contains("out of memory"));
    assert_eq!(handle.state(), ModelHandleState::Ready);
    Ok(())
}
