mod expr;
mod flux;
mod io;
mod model;
mod problem;
mod units;
