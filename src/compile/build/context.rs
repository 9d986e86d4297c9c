use crate::{
    compile::{build::Built, directive::Definition},
    filter::FilterManager,
    log::{error_build, Error},
    region::Region,
    Engine,
};
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};

/// State shared by every build step of one template.
///
/// Holds the constants defined with `#const` and `#param`, the macros
/// defined so far, the filter rules registered by escape directives, and
/// one frame of bound arguments for every macro being expanded.
pub struct BuildContext<'engine> {
    engine: &'engine Engine,
    name: Arc<str>,
    /// Source of the text being built, which changes while a macro defined
    /// in another template is expanded.
    source: Arc<str>,
    constants: HashMap<String, Value>,
    frames: Vec<HashMap<String, Built>>,
    macros: HashMap<String, Arc<Definition>>,
    params: Map<String, Value>,
    filters: FilterManager,
    /// Names of the macros being expanded, innermost last.
    expanding: Vec<String>,
}

impl<'engine> BuildContext<'engine> {
    /// Create a new [`BuildContext`] for the named template.
    ///
    /// Macros from the [`Engine`] library are visible from the start.
    pub fn new(engine: &'engine Engine, name: Arc<str>, source: Arc<str>) -> Self {
        Self {
            engine,
            name,
            source,
            constants: HashMap::new(),
            frames: Vec::new(),
            macros: engine.macros().clone(),
            params: Map::new(),
            filters: FilterManager::new(),
            expanding: Vec::new(),
        }
    }

    /// Return the [`Engine`] the template is built for.
    pub fn engine(&self) -> &'engine Engine {
        self.engine
    }

    /// Return the name of the template.
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Return the source of the text being built.
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// Return the value bound to a name, searching the innermost macro frame
    /// before the constants of the template.
    ///
    /// Arguments of an enclosing macro are never visible to an inner one.
    pub fn lookup(&self, name: &str) -> Option<Built> {
        if let Some(bound) = self.frames.last().and_then(|frame| frame.get(name)) {
            return Some(bound.clone());
        }

        self.constants
            .get(name)
            .map(|value| Built::Constant(value.clone()))
    }

    /// Bind a name to a value for the rest of the build.
    pub fn define_constant(&mut self, name: &str, value: Value) {
        self.constants.insert(name.to_string(), value);
    }

    /// Record a template parameter, which is also a constant.
    pub fn define_param(&mut self, name: &str, value: Value) {
        self.params.insert(name.to_string(), value.clone());
        self.define_constant(name, value);
    }

    /// Record a macro definition.
    pub fn define_macro(&mut self, name: &str, definition: Definition) {
        self.macros.insert(name.to_string(), Arc::new(definition));
    }

    /// Return the named macro definition.
    pub fn get_macro(&self, name: &str) -> Option<Arc<Definition>> {
        self.macros.get(name).cloned()
    }

    /// Return the filter rules registered so far.
    pub fn filters(&self) -> &FilterManager {
        &self.filters
    }

    /// Return the filter rules, to register new ones.
    pub fn filters_mut(&mut self) -> &mut FilterManager {
        &mut self.filters
    }

    /// Push a frame of bound arguments for a macro expansion, and switch to
    /// the source the macro was defined in.
    ///
    /// Returns the previous source, which must be handed to
    /// [`BuildContext::leave_macro`].
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] when the macro is already being expanded.
    pub fn enter_macro(
        &mut self,
        name: &str,
        frame: HashMap<String, Built>,
        source: Arc<str>,
    ) -> Result<Arc<str>, Error> {
        if self.expanding.iter().any(|expanding| expanding == name) {
            return Err(error_build(format!("macro `{name}` expands itself"))
                .with_help(format!("expansion chain: {} -> {name}", self.expanding.join(" -> "))));
        }
        self.expanding.push(name.to_string());
        self.frames.push(frame);

        Ok(std::mem::replace(&mut self.source, source))
    }

    /// Pop the frame pushed by [`BuildContext::enter_macro`].
    pub fn leave_macro(&mut self, previous: Arc<str>) {
        self.expanding.pop();
        self.frames.pop();
        self.source = previous;
    }

    /// Return an [`Error`] of kind [`Build`][`crate::Kind::Build`] pointing at
    /// the given [`Region`] of the text being built.
    pub fn error<T>(&self, reason: T, region: Region) -> Error
    where
        T: Into<String>,
    {
        error_build(reason)
            .with_pointer(&self.source, region)
            .with_name(&*self.name)
    }

    /// Consume the context and return the parameters and macros it recorded.
    pub fn finish(self) -> (Map<String, Value>, HashMap<String, Arc<Definition>>) {
        (self.params, self.macros)
    }
}

#[cfg(test)]
mod tests {
    use super::BuildContext;
    use crate::{compile::build::Built, Engine};
    use serde_json::json;
    use std::{collections::HashMap, sync::Arc};

    #[test]
    fn test_frame_hides_enclosing_frame() -> Result<(), crate::Error> {
        let engine = Engine::new();
        let mut context = BuildContext::new(&engine, "t".into(), "".into());
        context.define_constant("a", json!(1));

        let outer = HashMap::from([("a".to_string(), Built::Constant(json!(2)))]);
        let previous = context.enter_macro("foo", outer, "".into())?;
        assert_eq!(context.lookup("a").and_then(|b| b.constant().cloned()), Some(json!(2)));

        let inner = context.enter_macro("goo", HashMap::new(), "".into())?;
        assert_eq!(context.lookup("a").and_then(|b| b.constant().cloned()), Some(json!(1)));

        context.leave_macro(inner);
        context.leave_macro(previous);

        Ok(())
    }

    #[test]
    fn test_recursive_expansion() -> Result<(), crate::Error> {
        let engine = Engine::new();
        let mut context = BuildContext::new(&engine, "t".into(), Arc::from(""));
        let previous = context.enter_macro("foo", HashMap::new(), "".into())?;

        assert!(context.enter_macro("foo", HashMap::new(), "".into()).is_err());
        context.leave_macro(previous);

        Ok(())
    }
}
