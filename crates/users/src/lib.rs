//! User aggregate: bootstrap, registration, and login (event-sourced).

mod user;

pub use user::{
    AdminBootstrapped, BootstrapAdmin, LoginUser, RegisterUser, User, UserCommand, UserEvent,
    UserLoggedIn, UserRegistered,
};
