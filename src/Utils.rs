/// terminal logger setup keyed on the verbosity option
pub mod logger;
/// tic/tac phase timer and elapsed-time pretty printer
pub mod timer;
