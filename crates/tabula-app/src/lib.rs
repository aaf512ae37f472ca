// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod cache;
pub mod controller;
pub mod diff;
pub mod driver;
pub mod forms;
pub mod gateway;
pub mod ids;
pub mod model;
pub mod schema;
pub mod signal;
pub mod view;

pub use cache::*;
pub use controller::*;
pub use diff::*;
pub use driver::*;
pub use forms::*;
pub use gateway::*;
pub use ids::*;
pub use model::*;
pub use schema::*;
pub use signal::*;
pub use view::*;
