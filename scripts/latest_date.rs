use bvcscrap::util::arrow_utils::read_table_from_arrow;
use std::env;
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let path = env::args().nth(1).unwrap_or_else(|| "data/history.arrow".to_string());

    // 检查数据文件是否存在
    if !Path::new(&path).exists() {
        return Err(format!(
            "{} not found, export one first with 'bvcscrap history --name MASI --output {}'",
            path, path
        )
        .into());
    }

    let table = read_table_from_arrow(&path)?;

    match table.last_date() {
        Some(date) => {
            println!("Latest session for {}: {}", table.subject, date);
            // YYYY.M.D 版本号（无前导零）
            println!("Version: {}", date.format("%Y.%-m.%-d"));
        }
        None => println!("No rows in {}", path),
    }

    Ok(())
}
