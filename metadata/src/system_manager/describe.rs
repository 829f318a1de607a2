use super::{SystemManager, SystemManagerError};
use crate::printer::{RecordPrinter, ReportSink};
use crate::store::{IndexStore, RecordStore};

impl<R: RecordStore, I: IndexStore> SystemManager<R, I> {
    /// Writes names of all tables of the open database to `sink`, sorted.
    pub fn show_tables(&self, sink: &mut dyn ReportSink) -> Result<(), SystemManagerError> {
        let db = self.open_db()?;
        let printer = RecordPrinter::new(1);
        printer.print_separator(sink)?;
        printer.print_record(&["Tables"], sink)?;
        printer.print_separator(sink)?;
        for table in db.meta.tables() {
            printer.print_record(&[table.name()], sink)?;
        }
        printer.print_separator(sink)?;
        Ok(())
    }

    /// Writes columns of table `table_name` to `sink`: name, type and whether the column is indexed.
    pub fn desc_table(
        &self,
        table_name: &str,
        sink: &mut dyn ReportSink,
    ) -> Result<(), SystemManagerError> {
        let table = self.open_db()?.meta.table(table_name)?;
        let printer = RecordPrinter::new(3);
        printer.print_separator(sink)?;
        printer.print_record(&["Field", "Type", "Index"], sink)?;
        printer.print_separator(sink)?;
        for column in table.columns() {
            let ty = column.ty().to_string();
            let indexed = if column.indexed() { "YES" } else { "NO" };
            printer.print_record(&[column.name(), ty.as_str(), indexed], sink)?;
        }
        printer.print_separator(sink)?;
        Ok(())
    }
}
