//! Macrame - Template Engine
//!
//! Templates mix literal text with `$variables` and `#directives`:
//!
//! ```text
//! #foreach $user in $users {
//!   <li>$user.name</li>
//! }
//! ```
//!
//! An [`Engine`] holds the directives, filters, functions and named
//! templates. A [`Template`] is parsed once with an engine into an evaluation
//! tree, which is then evaluated any number of times with a [`Context`]
//! holding the variables of one render.
//!
//! # Examples
//!
//! ```
//! use macrame::Engine;
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let template = engine
//!     .compile("#foreach $user in $users {<li>$user.name</li>}")
//!     .unwrap();
//!
//! let mut context = engine
//!     .context()
//!     .with_must("users", json!([{"name": "taylor"}, {"name": "jordan"}]));
//!
//! assert_eq!(
//!     template.evaluate(&mut context).unwrap(),
//!     "<li>taylor</li><li>jordan</li>"
//! );
//! ```
mod compile;
mod engine;
pub mod filter;
pub mod function;
mod log;
mod region;
mod render;
mod writer;

pub use compile::{compile, directive, BuildContext, Built, Template};
pub use engine::{Engine, Settings};
pub use log::{Error, Kind};
pub use region::Region;
pub use render::{handler, render, Block, Context, Macro, Render, Variable};
pub use writer::FastWriter;
