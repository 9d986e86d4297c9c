use crate::{
    compile::{
        build::{BuildContext, Built},
        directive::{missing, Call, Descriptor, Directive, Slot},
    },
    log::Error,
};
use serde_json::Value;

/// `#text B`, which writes its block without parsing it.
pub struct TextDirective;

impl Directive for TextDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("text").with(Slot::Text("text", "#end"))
    }

    fn build(&self, call: &Call, _: &mut BuildContext) -> Result<Built, Error> {
        let text = call.arguments.text("text").ok_or_else(|| missing(call, "text"))?;

        Ok(Built::Constant(Value::String(text.to_string())))
    }
}

/// `#comment B`, which drops its block.
pub struct CommentDirective;

impl Directive for CommentDirective {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new("comment").with(Slot::Text("text", "#end"))
    }

    fn build(&self, _: &Call, _: &mut BuildContext) -> Result<Built, Error> {
        Ok(Built::Constant(Value::String(String::new())))
    }
}
