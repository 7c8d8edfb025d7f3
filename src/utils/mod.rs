pub mod hash;
pub mod logger;
pub mod throttle;
pub mod validator;
