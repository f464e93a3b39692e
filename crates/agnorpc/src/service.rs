//! # Services
//!
//! The contract between the protocol engine and the code that implements a service.
//!
//! - [`Service`]: function lookup, declared exception packers and GETINFO answers.
//!   Generated code may implement it directly.
//! - [`ServiceTable`]: a ready-made [`Service`] built from [`Function`]s and a
//!   [`ServiceDescriptor`].
//! - [`ServiceFactory`]: builds one service instance per connection, handing it the
//!   connection's object table so its object-reference packers resolve handles there.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use agnopack::HeteroMap;
use agnopack::Packer;
use agnopack::Registry;
use agnopack::Value;
use agnopack::ids;

use crate::codes::AGNOS_PROTOCOL_VERSION;
use crate::codes::AGNOS_TOOLCHAIN_VERSION;
use crate::codes::InfoCode;
use crate::objects::ObjectTable;

// ============================================================================
// Handlers
// ============================================================================

#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    /// Runs the function on already unpacked arguments.
    ///
    /// Return a [`crate::Fault`] inside the error to control the reply; any other
    /// error is reported as a generic exception.
    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value>;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        (self)(args).await
    }
}

#[derive(Clone)]
pub struct Arg {
    pub name: String,
    /// IDL type name, reported through GETINFO.
    pub type_name: String,
    pub packer: Packer,
}

/// One remotely callable function.
#[derive(Clone)]
pub struct Function {
    pub id: i32,
    pub name: String,
    pub args: Vec<Arg>,
    /// IDL type name of the result, `"void"` when there is none.
    pub result_type: String,
    pub result: Option<Packer>,
    handler: Arc<dyn Handler>,
}

impl Function {
    pub fn new<F, Fut>(id: i32, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::with_handler(id, name, Arc::new(handler))
    }

    pub fn with_handler(id: i32, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            id,
            name: name.into(),
            args: Vec::new(),
            result_type: "void".to_string(),
            result: None,
            handler,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, type_name: impl Into<String>, packer: Packer) -> Self {
        self.args.push(Arg { name: name.into(), type_name: type_name.into(), packer });
        self
    }

    pub fn returns(mut self, type_name: impl Into<String>, packer: Packer) -> Self {
        self.result_type = type_name.into();
        self.result = Some(packer);
        self
    }

    pub async fn call(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        self.handler.call(args).await
    }
}

// ============================================================================
// Service
// ============================================================================

pub trait Service: Send + Sync {
    fn function(&self, id: i32) -> Option<&Function>;

    /// Packer for a declared exception class.
    fn exception_packer(&self, class_id: i32) -> Option<&Packer>;

    /// Fills `info` with the answer to a GETINFO request.
    fn describe(&self, code: InfoCode, info: &mut HeteroMap) -> agnopack::Result<()>;
}

pub trait ServiceFactory: Send + Sync {
    fn create(&self, objects: Arc<ObjectTable>) -> Arc<dyn Service>;
}

impl<F> ServiceFactory for F
where
    F: Fn(Arc<ObjectTable>) -> Arc<dyn Service> + Send + Sync,
{
    fn create(&self, objects: Arc<ObjectTable>) -> Arc<dyn Service> {
        (self)(objects)
    }
}

// ============================================================================
// Service Table
// ============================================================================

/// Identity of a service as reported through GETINFO.
#[derive(Debug, Clone, Default)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Digest of the IDL the service was generated from.
    pub idl_magic: String,
    pub supported_versions: Vec<String>,
    /// Answer to `INFO_REFLECTION`: enums, records, exceptions and classes.
    pub reflection: HeteroMap,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn idl_magic(mut self, magic: impl Into<String>) -> Self {
        self.idl_magic = magic.into();
        self
    }

    pub fn supports(mut self, version: impl Into<String>) -> Self {
        self.supported_versions.push(version.into());
        self
    }

    pub fn reflection(mut self, reflection: HeteroMap) -> Self {
        self.reflection = reflection;
        self
    }
}

pub struct ServiceTable {
    descriptor: ServiceDescriptor,
    functions: BTreeMap<i32, Function>,
    exceptions: Registry,
}

impl ServiceTable {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self { descriptor, functions: BTreeMap::new(), exceptions: Registry::new() }
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.functions.insert(function.id, function);
        self
    }

    /// Declares an exception class. The client needs the same registration to decode it.
    pub fn with_exception(mut self, class_id: i32, packer: Packer) -> Self {
        self.exceptions.register_as(class_id, packer);
        self
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn exceptions(&self) -> &Registry {
        &self.exceptions
    }

    fn describe_meta(&self, info: &mut HeteroMap) -> agnopack::Result<()> {
        info.insert("INFO_META", InfoCode::Meta as i32)?;
        info.insert("INFO_SERVICE", InfoCode::Service as i32)?;
        info.insert("INFO_FUNCTIONS", InfoCode::Functions as i32)?;
        info.insert("INFO_REFLECTION", InfoCode::Reflection as i32)?;
        info.insert("COMPRESSION_SUPPORTED", true)?;
        Ok(())
    }

    fn describe_service(&self, info: &mut HeteroMap) -> agnopack::Result<()> {
        info.insert("AGNOS_TOOLCHAIN_VERSION", AGNOS_TOOLCHAIN_VERSION)?;
        info.insert("AGNOS_PROTOCOL_VERSION", AGNOS_PROTOCOL_VERSION)?;
        info.insert("IDL_MAGIC", self.descriptor.idl_magic.as_str())?;
        info.insert("SERVICE_NAME", self.descriptor.name.as_str())?;
        info.put("SUPPORTED_VERSIONS", Packer::Str, str_list(&self.descriptor.supported_versions), list_of_str());
        Ok(())
    }

    fn describe_functions(&self, info: &mut HeteroMap) -> agnopack::Result<()> {
        for func in self.functions.values() {
            let entry = info.new_map(func.id)?;
            entry.insert("name", func.name.as_str())?;
            entry.insert("type", func.result_type.as_str())?;
            let names: Vec<String> = func.args.iter().map(|a| a.name.clone()).collect();
            let types: Vec<String> = func.args.iter().map(|a| a.type_name.clone()).collect();
            entry.put("arg_names", Packer::Str, str_list(&names), list_of_str());
            entry.put("arg_types", Packer::Str, str_list(&types), list_of_str());
        }
        Ok(())
    }
}

impl Service for ServiceTable {
    fn function(&self, id: i32) -> Option<&Function> {
        self.functions.get(&id)
    }

    fn exception_packer(&self, class_id: i32) -> Option<&Packer> {
        self.exceptions.get(class_id)
    }

    fn describe(&self, code: InfoCode, info: &mut HeteroMap) -> agnopack::Result<()> {
        match code {
            InfoCode::Meta => self.describe_meta(info),
            InfoCode::Service => self.describe_service(info),
            InfoCode::Functions => self.describe_functions(info),
            InfoCode::Reflection => {
                info.put_all(&self.descriptor.reflection);
                Ok(())
            }
        }
    }
}

fn list_of_str() -> Packer {
    Packer::list_of(ids::LIST_OF_STR, Packer::Str)
}

fn str_list(items: &[String]) -> Value {
    Value::List(items.iter().map(|s| Value::from(s.as_str())).collect())
}
