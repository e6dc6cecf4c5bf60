//! The Lua side: loading the user script, resolving the `ott.process_*`
//! callbacks and calling them with a snapshot of the current feature.

use mlua::{Function, Lua, Table, Value};
use std::path::Path;

use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::osm::{ElementKind, OsmElement, Tags};

/// Global table holding the user's callbacks.
pub const NAMESPACE: &str = "ott";

/// Which callback, if any, is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingContext {
    /// Top level of the script, while it is being loaded.
    Main,
    ProcessNode,
    ProcessWay,
    ProcessRelation,
}

impl CallingContext {
    pub fn for_kind(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Node => CallingContext::ProcessNode,
            ElementKind::Way => CallingContext::ProcessWay,
            ElementKind::Relation => CallingContext::ProcessRelation,
        }
    }

    pub fn function_name(self) -> &'static str {
        match self {
            CallingContext::Main => "main",
            CallingContext::ProcessNode => "process_node",
            CallingContext::ProcessWay => "process_way",
            CallingContext::ProcessRelation => "process_relation",
        }
    }
}

/// A resolved `ott.process_*` function.
#[derive(Debug, Clone)]
pub struct Callback {
    name: &'static str,
    context: CallingContext,
    function: Function,
    nresults: usize,
}

impl Callback {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn context(&self) -> CallingContext {
        self.context
    }

    /// Results taken from each call; anything beyond is ignored.
    pub fn nresults(&self) -> usize {
        self.nresults
    }
}

/// What the script wants done with a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Keep,
    Drop,
    /// New tags in the order the script's table produced them.
    Replace(Tags),
}

/// Everything an accessor may look at during one call.
#[derive(Clone, Copy)]
struct CallContext<'a> {
    context: CallingContext,
    element: &'a OsmElement,
}

pub struct ScriptBinding {
    lua: Lua,
    process_node: Option<Callback>,
    process_way: Option<Callback>,
    process_relation: Option<Callback>,
}

impl ScriptBinding {
    /// Load the script file and resolve its callbacks.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::ScriptLoad(mlua::Error::external(e)))?;
        Self::from_source(&source, &format!("@{}", path.display()))
    }

    /// Same as [`ScriptBinding::load`] for a script held in memory.
    pub fn from_source(source: &str, chunk_name: &str) -> Result<Self> {
        let lua = Self::new_runtime()?;
        lua.load(source)
            .set_name(chunk_name)
            .exec()
            .map_err(Error::ScriptLoad)?;
        Self::bind_all(lua)
    }

    fn new_runtime() -> Result<Lua> {
        let lua = Lua::new();
        let ott = lua.create_table()?;
        ott.set("version", env!("CARGO_PKG_VERSION"))?;
        lua.globals().set(NAMESPACE, ott)?;
        Ok(lua)
    }

    fn bind_all(lua: Lua) -> Result<Self> {
        let ott = match lua.globals().get::<Value>(NAMESPACE)? {
            Value::Table(table) => table,
            _ => return Err(Error::MissingNamespace),
        };

        let process_node = bind(&ott, CallingContext::ProcessNode)?;
        let process_way = bind(&ott, CallingContext::ProcessWay)?;
        let process_relation = bind(&ott, CallingContext::ProcessRelation)?;

        Ok(ScriptBinding {
            lua,
            process_node,
            process_way,
            process_relation,
        })
    }

    pub fn callback(&self, kind: ElementKind) -> Option<&Callback> {
        match kind {
            ElementKind::Node => self.process_node.as_ref(),
            ElementKind::Way => self.process_way.as_ref(),
            ElementKind::Relation => self.process_relation.as_ref(),
        }
    }

    /// Names of the callbacks the script defines.
    pub fn bound_names(&self) -> Vec<&'static str> {
        [&self.process_node, &self.process_way, &self.process_relation]
            .into_iter()
            .flatten()
            .map(Callback::name)
            .collect()
    }

    /// Call `callback` with a snapshot of `element`. The accessor methods on
    /// the snapshot only work until this returns.
    pub fn call(
        &self,
        callback: &Callback,
        element: &OsmElement,
        bbox: &BoundingBox,
    ) -> Result<Decision> {
        let lua = &self.lua;
        let ctx = CallContext {
            context: callback.context,
            element,
        };

        let result = lua
            .scope(|scope| {
                let object = snapshot(lua, element, bbox)?;

                let methods = lua.create_table()?;
                methods.set(
                    "type",
                    scope.create_function(move |_, _: Value| Ok(ctx.element.kind().as_str()))?,
                )?;
                methods.set(
                    "context",
                    scope.create_function(move |_, _: Value| Ok(ctx.context.function_name()))?,
                )?;
                methods.set(
                    "version",
                    scope.create_function(move |_, _: Value| Ok(ctx.element.info().version))?,
                )?;
                methods.set(
                    "changeset",
                    scope.create_function(move |_, _: Value| Ok(ctx.element.info().changeset))?,
                )?;
                methods.set(
                    "timestamp",
                    scope.create_function(move |_, _: Value| Ok(ctx.element.info().timestamp))?,
                )?;
                methods.set(
                    "uid",
                    scope.create_function(move |_, _: Value| Ok(ctx.element.info().uid))?,
                )?;
                methods.set(
                    "user",
                    scope.create_function(move |_, _: Value| Ok(ctx.element.info().user.clone()))?,
                )?;
                methods.set(
                    "location",
                    scope.create_function(move |_, _: Value| match ctx.element {
                        OsmElement::Node(node) => Ok((Some(node.lon), Some(node.lat))),
                        _ => Ok((None, None)),
                    })?,
                )?;
                methods.set(
                    "node_refs",
                    scope.create_function(move |_, _: Value| match ctx.element {
                        OsmElement::Way(way) => Ok(Some(way.node_refs.clone())),
                        _ => Ok(None),
                    })?,
                )?;
                methods.set(
                    "members",
                    scope.create_function(move |lua, _: Value| {
                        let OsmElement::Relation(relation) = ctx.element else {
                            return Ok(None);
                        };
                        let list = lua.create_table_with_capacity(relation.members.len(), 0)?;
                        for (i, member) in relation.members.iter().enumerate() {
                            let entry = lua.create_table_with_capacity(0, 3)?;
                            entry.raw_set("type", member.member_type.as_str())?;
                            entry.raw_set("ref", member.member_id)?;
                            entry.raw_set("role", member.role.as_str())?;
                            list.raw_set(i + 1, entry)?;
                        }
                        Ok(Some(list))
                    })?,
                )?;

                let metatable = lua.create_table()?;
                metatable.set("__index", methods)?;
                object.set_metatable(Some(metatable));

                callback.function.call::<Value>(object)
            })
            .map_err(|source| Error::ScriptCall {
                name: callback.name,
                source,
            })?;

        decision_from(result)
    }
}

fn bind(ott: &Table, context: CallingContext) -> Result<Option<Callback>> {
    let name = context.function_name();
    match ott.get::<Value>(name)? {
        Value::Nil => Ok(None),
        Value::Function(function) => Ok(Some(Callback {
            name,
            context,
            function,
            nresults: 1,
        })),
        _ => Err(Error::NotCallable(name)),
    }
}

/// The table handed to a callback: `id`, `tags` and, for a valid box, `bbox`.
fn snapshot(lua: &Lua, element: &OsmElement, bbox: &BoundingBox) -> mlua::Result<Table> {
    let object = lua.create_table_with_capacity(0, 3)?;
    object.raw_set("id", element.id())?;

    let tags = lua.create_table_with_capacity(0, element.tags().len())?;
    for (key, value) in element.tags() {
        tags.raw_set(key.as_str(), value.as_str())?;
    }
    object.raw_set("tags", tags)?;

    if let Some(corners) = bbox.as_array() {
        object.raw_set("bbox", corners.to_vec())?;
    }

    Ok(object)
}

fn decision_from(value: Value) -> Result<Decision> {
    match value {
        Value::Boolean(true) => Ok(Decision::Keep),
        Value::Boolean(false) => Ok(Decision::Drop),
        Value::Table(table) => {
            let mut tags = Vec::new();
            for pair in table.pairs::<Value, Value>() {
                match pair? {
                    (Value::String(key), Value::String(value)) => {
                        tags.push(((*key.to_str()?).to_owned(), (*value.to_str()?).to_owned()));
                    }
                    _ => return Err(Error::InvalidTagType),
                }
            }
            Ok(Decision::Replace(tags))
        }
        _ => Err(Error::UnexpectedReturn),
    }
}
